use sqlx::Row;
use wiremock::matchers::{any, method, path};
use wiremock::{Mock, ResponseTemplate};

use snow_day_alerts::{
    domain::{
        new_subscriber::NewSubscriber, subscriber_email::SubscriberEmail,
        verification_token::VerificationToken,
    },
    registry::{RegistryError, SubscriberRegistry},
    routes::insert_with_fresh_token,
};

use crate::helpers::TestApp;

fn new_subscriber(email: &str) -> NewSubscriber {
    NewSubscriber {
        email: SubscriberEmail::parse(email.to_string()).unwrap(),
        phone: None,
    }
}

fn token(value: &str) -> VerificationToken {
    VerificationToken::from(value.to_string())
}

#[tokio::test]
async fn signup_returns_200_when_body_is_valid() {
    let test_app = TestApp::spawn_app().await;

    test_app.mount_email_ok().await;

    let response = test_app
        .post_signup(serde_json::json!({ "email": "snow@test.com" }))
        .await;

    assert_eq!(200, response.status().as_u16());

    let body: serde_json::Value = response.json().await.unwrap();

    assert_eq!(body, serde_json::json!({ "success": true }));
}

#[tokio::test]
async fn signup_persists_a_pending_subscriber() {
    let test_app = TestApp::spawn_app().await;

    test_app.mount_email_ok().await;
    test_app
        .post_signup(serde_json::json!({ "email": "snow@test.com", "phone": "905-525-9140" }))
        .await;

    let row = sqlx::query("SELECT email, phone, verification_token, verified FROM subscribers")
        .fetch_one(&test_app.db_pool)
        .await
        .expect("Query to fetch subscribers failed.");

    assert_eq!(row.get::<String, _>("email"), "snow@test.com");
    assert_eq!(
        row.get::<Option<String>, _>("phone").as_deref(),
        Some("905-525-9140")
    );
    assert_eq!(row.get::<String, _>("verification_token").len(), 32);
    assert!(!row.get::<bool, _>("verified"));
}

#[tokio::test]
async fn signup_stores_blank_phone_as_null() {
    let test_app = TestApp::spawn_app().await;

    test_app.mount_email_ok().await;
    test_app
        .post_signup(serde_json::json!({ "email": "snow@test.com", "phone": "" }))
        .await
        .error_for_status()
        .unwrap();

    let phone: Option<String> = sqlx::query_scalar("SELECT phone FROM subscribers")
        .fetch_one(&test_app.db_pool)
        .await
        .unwrap();

    assert_eq!(phone, None);
}

#[tokio::test]
async fn signup_sends_one_verification_email_with_a_link() {
    let test_app = TestApp::spawn_app().await;

    Mock::given(path("/v3/smtp/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&test_app.email_server)
        .await;

    test_app
        .post_signup(serde_json::json!({ "email": "snow@test.com" }))
        .await;

    // Get the first request that was sent to the email server
    let received_requests = &test_app.email_server.received_requests().await.unwrap();
    let link = test_app.get_verification_link(&received_requests[0]);

    let stored_token: String = sqlx::query_scalar("SELECT verification_token FROM subscribers")
        .fetch_one(&test_app.db_pool)
        .await
        .unwrap();

    assert_eq!(link.token, stored_token);
    assert_eq!(link.html.path(), "/verify");
    assert!(link
        .html
        .as_str()
        .starts_with(test_app.config.get_app_base_url().as_str()));
}

#[tokio::test]
async fn signup_returns_400_when_email_is_missing() {
    let test_app = TestApp::spawn_app().await;

    // This is a common practice and it is called table-driven tests. In this case, it simulates different kind of possible request bodies
    // where API should return 400.
    let test_cases = vec![
        (serde_json::json!({}), "missing body parameters"),
        (
            serde_json::json!({ "phone": "9055259140" }),
            "missing email parameter",
        ),
        (serde_json::json!({ "email": "" }), "empty email"),
        (serde_json::json!({ "email": "   " }), "blank email"),
    ];

    for (invalid_body, error_message) in test_cases {
        let response = test_app.post_signup(invalid_body).await;

        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not fail with 400 status when payload was {}",
            error_message
        );

        let body: serde_json::Value = response.json().await.unwrap();

        assert_eq!(body, serde_json::json!({ "error": "Email required" }));
    }

    assert_eq!(test_app.subscriber_count().await, 0);
}

#[tokio::test]
async fn signup_returns_400_when_fields_are_present_but_not_valid() {
    let test_app = TestApp::spawn_app().await;
    let test_cases = vec![
        (
            serde_json::json!({ "email": "snow.test.com" }),
            "Invalid email address",
        ),
        (
            serde_json::json!({ "email": "snow@test.com", "phone": "9".repeat(65) }),
            "Invalid phone number",
        ),
    ];

    for (invalid_body, expected_error) in test_cases {
        let response = test_app.post_signup(invalid_body).await;

        assert_eq!(400, response.status().as_u16());

        let body: serde_json::Value = response.json().await.unwrap();

        assert_eq!(body["error"], expected_error);
    }

    assert_eq!(test_app.subscriber_count().await, 0);
}

#[tokio::test]
async fn signup_stores_free_form_phone_as_given() {
    let test_app = TestApp::spawn_app().await;

    test_app.mount_email_ok().await;

    let response = test_app
        .post_signup(serde_json::json!({
            "email": "snow@test.com",
            "phone": " 905-525-9140 ext 24 ",
        }))
        .await;

    assert_eq!(200, response.status().as_u16());

    let phone: Option<String> = sqlx::query_scalar("SELECT phone FROM subscribers")
        .fetch_one(&test_app.db_pool)
        .await
        .unwrap();

    assert_eq!(phone.as_deref(), Some("905-525-9140 ext 24"));
}

#[tokio::test]
async fn signup_returns_400_with_json_error_for_malformed_body() {
    let test_app = TestApp::spawn_app().await;

    let response = reqwest::Client::new()
        .post(&format!("{}/api/signup", test_app.address))
        .header("Content-Type", "application/json")
        .body("{ not json")
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(400, response.status().as_u16());

    let body: serde_json::Value = response.json().await.unwrap();

    assert!(body["error"].is_string());
}

#[tokio::test]
async fn signup_of_pending_email_is_rejected_and_resends_the_same_link() {
    let test_app = TestApp::spawn_app().await;

    test_app.mount_email_ok().await;

    let first = test_app
        .post_signup(serde_json::json!({ "email": "snow@test.com" }))
        .await;
    let second = test_app
        .post_signup(serde_json::json!({ "email": "snow@test.com" }))
        .await;

    assert_eq!(200, first.status().as_u16());
    assert_eq!(400, second.status().as_u16());

    let body: serde_json::Value = second.json().await.unwrap();

    assert_eq!(body["code"], "EMAIL_ALREADY_REGISTERED");
    assert_eq!(
        body["error"],
        "Email already registered. Check your inbox for the verification link."
    );
    assert_eq!(test_app.subscriber_count().await, 1);

    let received_requests = test_app.wait_for_email_requests(2).await;

    assert_eq!(received_requests.len(), 2);
    assert_eq!(
        test_app.get_verification_link(&received_requests[0]).token,
        test_app.get_verification_link(&received_requests[1]).token
    );
}

#[tokio::test]
async fn signup_of_verified_email_is_rejected_without_sending_an_email() {
    let test_app = TestApp::spawn_app().await;

    test_app.create_verified_subscriber("snow@test.com").await;

    Mock::given(any())
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&test_app.email_server)
        .await;

    let response = test_app
        .post_signup(serde_json::json!({ "email": "snow@test.com" }))
        .await;

    assert_eq!(400, response.status().as_u16());

    let body: serde_json::Value = response.json().await.unwrap();

    assert_eq!(
        body,
        serde_json::json!({
            "error": "Email already registered and verified.",
            "code": "EMAIL_ALREADY_VERIFIED"
        })
    );
    assert_eq!(test_app.subscriber_count().await, 1);
}

#[tokio::test]
async fn signup_of_pending_email_is_still_rejected_when_the_resend_fails() {
    let test_app = TestApp::spawn_app().await;

    test_app.create_pending_subscriber("snow@test.com").await;

    Mock::given(path("/v3/smtp/email"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .named("Failing resend")
        .expect(1)
        .mount(&test_app.email_server)
        .await;

    let response = test_app
        .post_signup(serde_json::json!({ "email": "snow@test.com" }))
        .await;

    assert_eq!(400, response.status().as_u16());

    let body: serde_json::Value = response.json().await.unwrap();

    assert_eq!(
        body,
        serde_json::json!({
            "error": "Email already registered. Check your inbox for the verification link.",
            "code": "EMAIL_ALREADY_REGISTERED"
        })
    );

    // One request from the first signup, one failed resend.
    test_app.wait_for_email_requests(2).await;

    let verified: bool = sqlx::query_scalar("SELECT verified FROM subscribers")
        .fetch_one(&test_app.db_pool)
        .await
        .unwrap();

    assert!(!verified);
}

#[tokio::test]
async fn signup_of_duplicate_email_falls_back_to_a_plain_rejection_when_the_lookup_fails() {
    let test_app = TestApp::spawn_app().await;

    test_app.create_pending_subscriber("snow@test.com").await;

    // The insert still hits the email constraint, but the existing row can no
    // longer be decoded by the lookup.
    sqlx::query("ALTER TABLE subscribers ALTER COLUMN created_at TYPE timestamp;")
        .execute(&test_app.db_pool)
        .await
        .unwrap();

    Mock::given(any())
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&test_app.email_server)
        .await;

    let response = test_app
        .post_signup(serde_json::json!({ "email": "snow@test.com" }))
        .await;

    assert_eq!(400, response.status().as_u16());

    let body: serde_json::Value = response.json().await.unwrap();

    assert_eq!(
        body,
        serde_json::json!({ "error": "Email already registered." })
    );
    assert_eq!(test_app.subscriber_count().await, 1);
}

#[tokio::test]
async fn token_collision_is_retried_with_a_fresh_token() {
    let test_app = TestApp::spawn_app().await;
    let registry = SubscriberRegistry::new(test_app.db_pool.clone());

    registry
        .insert_pending(&new_subscriber("first@test.com"), &token("taken"))
        .await
        .unwrap();

    let mut issued = vec![token("fresh"), token("taken")];
    let subscriber = insert_with_fresh_token(&registry, &new_subscriber("second@test.com"), || {
        issued.pop().unwrap()
    })
    .await
    .unwrap();

    assert!(issued.is_empty());
    assert_eq!(subscriber.verification_token.as_ref(), "fresh");
    assert_eq!(subscriber.email.as_ref(), "second@test.com");
    assert_eq!(test_app.subscriber_count().await, 2);
}

#[tokio::test]
async fn token_collision_gives_up_after_three_attempts() {
    let test_app = TestApp::spawn_app().await;
    let registry = SubscriberRegistry::new(test_app.db_pool.clone());

    registry
        .insert_pending(&new_subscriber("first@test.com"), &token("taken"))
        .await
        .unwrap();

    let mut attempts = 0;
    let result = insert_with_fresh_token(&registry, &new_subscriber("second@test.com"), || {
        attempts += 1;
        token("taken")
    })
    .await;

    assert!(matches!(result, Err(RegistryError::TokenConflict)));
    assert_eq!(attempts, 3);
    assert_eq!(test_app.subscriber_count().await, 1);
}

#[tokio::test]
async fn signup_returns_500_and_keeps_the_row_when_delivery_fails() {
    let test_app = TestApp::spawn_app().await;

    Mock::given(path("/v3/smtp/email"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&test_app.email_server)
        .await;

    let response = test_app
        .post_signup(serde_json::json!({ "email": "snow@test.com" }))
        .await;

    assert_eq!(500, response.status().as_u16());

    let body: serde_json::Value = response.json().await.unwrap();

    assert_eq!(
        body,
        serde_json::json!({ "error": "Failed to send verification email." })
    );

    let verified: bool = sqlx::query_scalar("SELECT verified FROM subscribers")
        .fetch_one(&test_app.db_pool)
        .await
        .expect("The subscriber row should survive a delivery failure.");

    assert!(!verified);
}

#[tokio::test]
async fn signup_returns_500_when_the_database_fails() {
    let test_app = TestApp::spawn_app().await;

    sqlx::query("ALTER TABLE subscribers DROP COLUMN phone;")
        .execute(&test_app.db_pool)
        .await
        .unwrap();

    let response = test_app
        .post_signup(serde_json::json!({ "email": "snow@test.com" }))
        .await;

    assert_eq!(500, response.status().as_u16());

    let body: serde_json::Value = response.json().await.unwrap();

    assert_eq!(body, serde_json::json!({ "error": "Something went wrong." }));
}

#[tokio::test]
async fn concurrent_signups_for_the_same_email_create_a_single_row() {
    let test_app = TestApp::spawn_app().await;

    test_app.mount_email_ok().await;

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let url = format!("{}/api/signup", test_app.address);

            tokio::spawn(async move {
                reqwest::Client::new()
                    .post(&url)
                    .json(&serde_json::json!({ "email": "race@test.com" }))
                    .send()
                    .await
                    .expect("Failed to execute request.")
            })
        })
        .collect();

    let mut successes = 0;

    for handle in handles {
        let response = handle.await.unwrap();

        if response.status().as_u16() == 200 {
            successes += 1;
            continue;
        }

        assert_eq!(400, response.status().as_u16());

        let body: serde_json::Value = response.json().await.unwrap();

        assert_eq!(body["code"], "EMAIL_ALREADY_REGISTERED");
    }

    assert_eq!(successes, 1);
    assert_eq!(test_app.subscriber_count().await, 1);
}

#[tokio::test]
async fn signup_and_verify_follow_the_documented_lifecycle() {
    let test_app = TestApp::spawn_app().await;

    test_app.mount_email_ok().await;

    let response = test_app
        .post_signup(serde_json::json!({ "email": "a@b.com" }))
        .await;
    assert_eq!(200, response.status().as_u16());

    let response = test_app
        .post_signup(serde_json::json!({ "email": "a@b.com" }))
        .await;
    assert_eq!(400, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "EMAIL_ALREADY_REGISTERED");

    let received_requests = test_app.wait_for_email_requests(2).await;
    let link = test_app.get_verification_link(&received_requests[0]);

    let response = test_app.get_verify(Some(&link.token)).await;
    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, serde_json::json!({ "success": true, "email": "a@b.com" }));

    let response = test_app
        .post_signup(serde_json::json!({ "email": "a@b.com" }))
        .await;
    assert_eq!(400, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["code"], "EMAIL_ALREADY_VERIFIED");
}

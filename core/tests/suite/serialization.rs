use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::time::Instant;
use vetting_core::PageId;
use vetting_core::RowId;
use vetting_core::VoteChoice;
use vetting_core::VoteReport;
use vetting_test_support::engine_for;
use vetting_test_support::page_json;
use vetting_test_support::page_path;
use vetting_test_support::row_json;
use vetting_test_support::row_path;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

const SLOW_VOTE: Duration = Duration::from_millis(300);

async fn mount_row(server: &MockServer, row_id: &str, row_hash: &str, vote_delay: Duration) {
    Mock::given(method("POST"))
        .and(path(row_path(row_id)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"didVote": true}))
                .set_delay(vote_delay),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(row_path(row_id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json(&[(
            row_hash,
            row_json(row_id, "v2", &[("v1", "old"), ("v2", "new")]),
        )])))
        .mount(server)
        .await;
}

#[tokio::test]
async fn votes_on_different_rows_are_sent_one_at_a_time() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(page_path("Languages")))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json(&[
            ("h-a", row_json("a", "v1", &[("v1", "old")])),
            ("h-b", row_json("b", "v1", &[("v1", "old")])),
        ])))
        .mount(&server)
        .await;
    mount_row(&server, "a", "h-a", SLOW_VOTE).await;
    mount_row(&server, "b", "h-b", Duration::ZERO).await;

    let engine = engine_for(&server);
    engine.load_page(&PageId::from("Languages")).await.unwrap();

    let started = Instant::now();
    let first = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .submit_vote(&RowId::from("a"), VoteChoice::Value("new".into()))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = engine
        .submit_vote(&RowId::from("b"), VoteChoice::Value("new".into()))
        .await;

    assert!(
        started.elapsed() >= SLOW_VOTE,
        "second vote resolved before the first one was answered"
    );
    assert!(matches!(second, VoteReport::Confirmed { .. }));
    assert!(matches!(first.await.unwrap(), VoteReport::Confirmed { .. }));

    let posts: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|request| request.method.as_str() == "POST")
        .map(|request| request.url.path().to_string())
        .collect();
    assert_eq!(posts, vec![row_path("a"), row_path("b")]);
}

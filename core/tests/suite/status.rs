use std::time::Duration;

use pretty_assertions::assert_eq;
use vetting_core::PageId;
use vetting_core::status::StatusVerdict;
use vetting_test_support::api_path;
use vetting_test_support::engine_for;
use vetting_test_support::page_json;
use vetting_test_support::page_path;
use vetting_test_support::row_json;
use vetting_test_support::status_json;
use vetting_test_support::wait_until;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

async fn mount_status_sequence(server: &MockServer, bodies: &[serde_json::Value]) {
    for body in bodies {
        Mock::given(method("GET"))
            .and(path(api_path("status")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body.clone()))
            .up_to_n_times(1)
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn server_restart_disconnects_and_holds_queued_requests() {
    let server = MockServer::start().await;
    mount_status_sequence(&server, &[status_json(1, 10), status_json(2, 10)]).await;
    Mock::given(method("GET"))
        .and(path(page_path("Languages")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page_json(&[("h-fr", row_json("fr", "v1", &[("v1", "fr")]))])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    assert_eq!(engine.poll_status().await, StatusVerdict::Healthy);
    let verdict = engine.poll_status().await;
    assert!(
        matches!(&verdict, StatusVerdict::Disconnected { reason } if reason.contains("restarted")),
        "unexpected verdict {verdict:?}"
    );
    assert!(engine.is_disconnected());

    let load = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.load_page(&PageId::from("Languages")).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let page_requests = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|request| request.url.path() == page_path("Languages"))
        .count();
    assert_eq!(page_requests, 0);

    engine.reconnect();
    let report = load.await.unwrap().unwrap();
    assert_eq!(report.tracked.len(), 1);
}

#[tokio::test]
async fn newer_locale_stamp_reloads_the_current_page() {
    let server = MockServer::start().await;
    mount_status_sequence(&server, &[status_json(1, 10), status_json(1, 11)]).await;
    Mock::given(method("GET"))
        .and(path(page_path("Languages")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(page_json(&[("h-fr", row_json("fr", "v1", &[("v1", "fr")]))])),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(page_path("Languages")))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json(&[(
            "h-fr",
            row_json("fr", "v2", &[("v1", "fr"), ("v2", "français")]),
        )])))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    engine.load_page(&PageId::from("Languages")).await.unwrap();
    assert_eq!(engine.poll_status().await, StatusVerdict::Healthy);
    assert_eq!(engine.poll_status().await, StatusVerdict::Healthy);

    let row_id = vetting_core::RowId::from("fr");
    let reloaded = wait_until(Duration::from_secs(2), || {
        engine
            .row(&row_id)
            .and_then(|row| row.view().winning_value.clone())
            .as_deref()
            == Some("français")
    })
    .await;
    assert!(reloaded, "row should reflect the reloaded page");
}

#[tokio::test]
async fn unreachable_status_endpoint_disconnects() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(api_path("status")))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let poller = engine.spawn_status_poller();
    tokio::time::timeout(Duration::from_secs(2), poller)
        .await
        .expect("poller should stop on its own")
        .unwrap();

    assert!(engine.is_disconnected());
    let reason = engine.context().link().reason().unwrap();
    assert!(reason.starts_with("Status request failed"), "{reason}");
}

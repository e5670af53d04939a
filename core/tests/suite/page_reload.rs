use pretty_assertions::assert_eq;
use vetting_core::EngineEvent;
use vetting_core::PageId;
use vetting_core::RowId;
use vetting_core::SnapshotOrigin;
use vetting_core::page::ReloadDecision;
use vetting_test_support::engine_for;
use vetting_test_support::page_json;
use vetting_test_support::page_path;
use vetting_test_support::row_json;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

#[tokio::test]
async fn reload_applies_only_changed_rows() {
    let server = MockServer::start().await;
    let unchanged = row_json("a", "v1", &[("v1", "alpha")]);
    Mock::given(method("GET"))
        .and(path(page_path("Letters")))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json(&[
            ("h-a", unchanged.clone()),
            ("h-b", row_json("b", "v1", &[("v1", "beta")])),
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(page_path("Letters")))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json(&[
            ("h-a", unchanged),
            ("h-b", row_json("b", "v2", &[("v1", "beta"), ("v2", "bêta")])),
        ])))
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    engine.load_page(&PageId::from("Letters")).await.unwrap();
    let mut events = engine.subscribe();

    let ReloadDecision::Reloaded(report) = engine.reload_current_page().await.unwrap() else {
        panic!("expected the page to reload");
    };
    assert_eq!(report.applied, vec![RowId::from("b")]);
    assert_eq!(report.unchanged, vec![RowId::from("a")]);

    match events.recv().await.unwrap() {
        EngineEvent::RowApplied { row_id, origin, .. } => {
            assert_eq!(row_id, RowId::from("b"));
            assert_eq!(origin, SnapshotOrigin::Bulk);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

use pretty_assertions::assert_eq;
use serde_json::json;
use vetting_core::PageId;
use vetting_core::RowId;
use vetting_core::VoteChoice;
use vetting_core::VoteReport;
use vetting_core::diagnostics::DiagnosticKind;
use vetting_core::row::TransitionState;
use vetting_core::transport::SESSION_HEADER;
use vetting_test_support::LOCALE;
use vetting_test_support::SESSION;
use vetting_test_support::engine_for;
use vetting_test_support::page_json;
use vetting_test_support::page_path;
use vetting_test_support::row_json;
use vetting_test_support::row_path;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::body_json;
use wiremock::matchers::header;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::matchers::query_param;

async fn mount_page(server: &MockServer, rows: &[(&str, serde_json::Value)]) {
    Mock::given(method("GET"))
        .and(path(page_path("Languages")))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json(rows)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn accepted_vote_refreshes_row_from_server() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        &[("h-fr", row_json("fr", "v1", &[("v1", "français")]))],
    )
    .await;
    Mock::given(method("POST"))
        .and(path(row_path("fr")))
        .and(header(SESSION_HEADER, SESSION))
        .and(body_json(json!({"value": "francais", "voteLevelChanged": 0})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "didVote": true,
            "testResults": [],
            "statusAction": "ALLOW",
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(row_path("fr")))
        .and(query_param("fhash", "h-fr"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json(&[(
            "h-fr",
            row_json("fr", "v2", &[("v1", "français"), ("v2", "francais")]),
        )])))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    engine.load_page(&PageId::from("Languages")).await.unwrap();
    let report = engine
        .submit_vote(&RowId::from("fr"), VoteChoice::Value("francais".into()))
        .await;

    assert!(matches!(report, VoteReport::Confirmed { diagnostic: None, .. }));
    let row = engine.row(&RowId::from("fr")).unwrap();
    assert_eq!(row.state(), TransitionState::Idle);
    assert_eq!(row.view().winning_value.as_deref(), Some("francais"));
}

#[tokio::test]
async fn policy_rejection_skips_refresh() {
    let server = MockServer::start().await;
    mount_page(&server, &[("h-de", row_json("de", "v1", &[("v1", "allemand")]))]).await;
    Mock::given(method("POST"))
        .and(path(row_path("de")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "didVote": false,
            "statusAction": "FORBID_READONLY",
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(row_path("de")))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    engine.load_page(&PageId::from("Languages")).await.unwrap();
    let report = engine
        .submit_vote(&RowId::from("de"), VoteChoice::Value("Deutsch".into()))
        .await;

    let VoteReport::Rejected {
        diagnostic: Some(diagnostic),
    } = report
    else {
        panic!("expected a rejection with a diagnostic, got {report:?}");
    };
    assert_eq!(diagnostic.kind, DiagnosticKind::Policy);
    let row = engine.row(&RowId::from("de")).unwrap();
    assert_eq!(row.state(), TransitionState::Idle);
    assert_eq!(row.view().winning_value.as_deref(), Some("allemand"));
}

#[tokio::test]
async fn server_error_leaves_row_in_error_state() {
    let server = MockServer::start().await;
    mount_page(&server, &[("h-es", row_json("es", "v1", &[("v1", "espagnol")]))]).await;
    Mock::given(method("POST"))
        .and(path(row_path("es")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    engine.load_page(&PageId::from("Languages")).await.unwrap();
    let report = engine
        .submit_vote(&RowId::from("es"), VoteChoice::Value("español".into()))
        .await;

    assert!(matches!(report, VoteReport::Failed { .. }));
    let row = engine.row(&RowId::from("es")).unwrap();
    assert_eq!(row.state(), TransitionState::Error);

    // A second vote on the failed row is refused until it is recovered.
    let again = engine
        .submit_vote(&RowId::from("es"), VoteChoice::Abstain)
        .await;
    assert!(matches!(again, VoteReport::Ignored(_)));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn missing_vote_is_sent_as_delete() {
    let server = MockServer::start().await;
    mount_page(&server, &[("h-it", row_json("it", "v1", &[("v1", "italien")]))]).await;
    Mock::given(method("DELETE"))
        .and(path(row_path("it")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(row_path("it")))
        .and(query_param("fhash", "h-it"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json(&[(
            "h-it",
            row_json("it", "v1", &[("v1", "italien")]),
        )])))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    engine.load_page(&PageId::from("Languages")).await.unwrap();
    let report = engine
        .submit_vote(&RowId::from("it"), VoteChoice::Missing)
        .await;

    assert!(
        matches!(report, VoteReport::Confirmed { .. }),
        "unexpected report {report:?} for locale {LOCALE}"
    );
}

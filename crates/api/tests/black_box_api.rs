use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;

use govsync_core::{CommitteeMemberId, DelegateId, Epoch, GovActionType, InstanceId, Lovelace, ProposalId, Vote};
use govsync_infra::SyncConfig;
use govsync_infra::jobs::{EPOCH_SYNC_JOB, RetryPolicy, SyncJobs};
use govsync_infra::store::{InMemorySyncStore, ProposalSnapshotStore};
use govsync_infra::upstream::FakeLedgerApi;
use govsync_tally::{CommitteeSnapshot, CommitteeVoteRecord, ProposalLedgerSnapshot, StakeBuckets};

struct TestServer {
    base_url: String,
    jobs: Arc<SyncJobs>,
    store: Arc<InMemorySyncStore>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let api = Arc::new(FakeLedgerApi::new());
        api.set_tip(Epoch(4));
        let drep = DelegateId::parse("drep1a").unwrap();
        api.add_drep(drep.clone(), true, true);
        for e in 0..4 {
            api.set_voting_power(Epoch(e), drep.clone(), Lovelace::from(1_000u64));
        }

        let config = SyncConfig {
            instance_id: InstanceId::parse("black-box").unwrap(),
            retry: RetryPolicy::no_retry(),
            ..Default::default()
        };
        let store = Arc::new(InMemorySyncStore::new());
        let jobs = Arc::new(SyncJobs::new(store.clone(), api, &config));

        // Same router as prod, bound to an ephemeral port.
        let services = Arc::new(govsync_api::app::AppServices::new(jobs.clone()));
        let app = govsync_api::app::build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            jobs,
            store,
            handle,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn health_is_ok() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn epoch_sync_trigger_runs_and_records_state() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/admin/jobs/epoch-sync", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["report"]["synced"].as_array().unwrap().len(), 4);

    let res = client
        .get(format!("{}/admin/jobs/epoch-sync", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let state: serde_json::Value = res.json().await.unwrap();
    assert_eq!(state["is_running"], false);
    assert_eq!(state["last_result"], "success");
    assert_eq!(state["items_processed"], 4);
    assert_eq!(state["locked_by"], "black-box");
}

#[tokio::test]
async fn full_sync_state_is_readable_for_every_job() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/admin/jobs/full-sync", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    for job in ["epoch-sync", "delegation-sync", "full-sync"] {
        let res = client
            .get(format!("{}/admin/jobs/{job}", srv.base_url))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK, "{job}");
        let state: serde_json::Value = res.json().await.unwrap();
        assert_eq!(state["is_running"], false, "{job}");
        assert_eq!(state["last_result"], "success", "{job}");
    }
}

#[tokio::test]
async fn held_lease_answers_conflict() {
    let srv = TestServer::spawn().await;
    assert!(
        srv.jobs
            .lock()
            .try_acquire(EPOCH_SYNC_JOB, Duration::from_secs(60))
            .await
            .unwrap()
    );

    let res = reqwest::Client::new()
        .post(format!("{}/admin/jobs/epoch-sync", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "conflict");
    assert!(body["message"].as_str().unwrap().contains(EPOCH_SYNC_JOB));
}

#[tokio::test]
async fn unknown_job_and_unrun_job_are_not_found() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/admin/jobs/reindex-everything", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(format!("{}/admin/jobs/delegation-sync", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn proposal_tally_is_computed_from_stored_snapshot() {
    let srv = TestServer::spawn().await;
    let id = ProposalId::parse("gov_action1constitution").unwrap();
    let votes = (0..5)
        .map(|n| CommitteeVoteRecord {
            member: CommitteeMemberId::parse(format!("cc_cold1m{n}")).unwrap(),
            vote: Vote::Yes,
            voted_at: None,
            recorded_at: chrono::Utc::now(),
        })
        .collect();
    srv.store
        .upsert_proposal_snapshot(&ProposalLedgerSnapshot {
            proposal_id: id.clone(),
            action_type: GovActionType::NewConstitution,
            submission_epoch: Epoch(540),
            drep: Some(StakeBuckets {
                total: Lovelace::from(1_000u64),
                yes: Lovelace::from(800u64),
                no: Lovelace::from(200u64),
                ..Default::default()
            }),
            spo: None,
            committee: Some(CommitteeSnapshot {
                roster_size: 7,
                votes,
            }),
        })
        .await
        .unwrap();

    let client = reqwest::Client::new();
    let res = client
        .get(format!("{}/proposals/{}/tally", srv.base_url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["ratification"]["status"], "passed");
    assert_eq!(body["committee"]["yes"], 5);

    let res = client
        .get(format!("{}/proposals/gov_action1missing/tally", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
}

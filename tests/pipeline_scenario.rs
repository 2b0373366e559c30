//! End-to-end walk of one workload through every stage.

mod common;

use common::{StubGateway, harness};
use outreach::pipeline::{
    ApprovedDraft, Disposition, ProcessingStage, RerunFlags, WorkloadId, WorkloadSeed, fields,
};
use outreach::worker::{SchedulerConfig, Slot};

async fn step_expect(h: &common::Harness, stage: ProcessingStage, disposition: Disposition) {
    let tick = h.scheduler.run_once().await.expect("a workload should be ready");
    assert_eq!(tick.stage, stage);
    assert_eq!(tick.disposition, disposition);
}

#[tokio::test]
async fn acme_runs_from_discovery_to_completion() {
    let h = harness(StubGateway::new(12), SchedulerConfig::default()).await;
    let acme = WorkloadId::new("acme.com");
    let state = h
        .scheduler
        .register(acme.clone(), WorkloadSeed::default(), RerunFlags::default())
        .await
        .unwrap();
    assert_eq!(state.stage, ProcessingStage::NotStarted);

    // Discovery
    step_expect(&h, ProcessingStage::ProfilesScraped, Disposition::Requeue).await;
    let people = h.store.list_people(&acme).await.unwrap();
    assert_eq!(people.len(), 12);

    // Selection gate
    step_expect(&h, ProcessingStage::ProfilesScraped, Disposition::Park).await;
    h.scheduler.submit_selection(&acme, &[0, 2, 5, 7]).await.unwrap();
    step_expect(&h, ProcessingStage::ProfilesSelected, Disposition::Requeue).await;

    // Enrichment touches only the chosen four
    step_expect(&h, ProcessingStage::ProfilesProcessed, Disposition::Requeue).await;
    assert_eq!(h.stub.enrich_calls(), 4);
    let state = h.scheduler.status(&acme).await.unwrap().state;
    let chosen: Vec<String> = state.chosen_identities().into_iter().map(String::from).collect();
    assert_eq!(chosen.len(), 4);
    for stored in h.store.list_people(&acme).await.unwrap() {
        let enriched = stored.person.has(fields::INSIGHTS);
        assert_eq!(enriched, chosen.contains(&stored.identity), "{}", stored.identity);
    }

    // Drafting
    step_expect(&h, ProcessingStage::MessagesDrafted, Disposition::Requeue).await;
    let mut approvals = Vec::new();
    for identity in &chosen {
        let person = h.store.get_person(&acme, identity).await.unwrap().unwrap();
        assert!(person.has(fields::DRAFT_EMAIL));
        approvals.push(ApprovedDraft {
            name: person.name.clone(),
            subject: "Quick hello".into(),
            body: format!("Hi {}", person.name),
            direct_message: None,
        });
    }

    // Approval gate
    step_expect(&h, ProcessingStage::MessagesDrafted, Disposition::Park).await;
    h.scheduler.submit_approved_drafts(&acme, &approvals).await.unwrap();
    step_expect(&h, ProcessingStage::MessagesApproved, Disposition::Requeue).await;

    // Sending finishes the workload
    step_expect(&h, ProcessingStage::Completed, Disposition::Retire).await;
    let delivered = h.stub.delivered();
    assert_eq!(delivered.len(), 4 * 6, "six address guesses per person");
    for identity in &chosen {
        let person = h.store.get_person(&acme, identity).await.unwrap().unwrap();
        assert_eq!(person.list(fields::SENT_TO).len(), 6);
        assert!(person.list(fields::SEND_FAILURES).is_empty());
    }

    // Retired: nothing left to run, and stepping again does nothing
    assert!(h.scheduler.run_once().await.is_none());
    let status = h.scheduler.status(&acme).await.unwrap();
    assert_eq!(status.slot, Some(Slot::Retired));
    assert_eq!(status.state.stage, ProcessingStage::Completed);

    let before = h.store.list_people(&acme).await.unwrap();
    let outcome = outreach::pipeline::WorkloadProcessor::new(
        acme.clone(),
        h.store.clone(),
        outreach::gateway::Gateway::new(
            h.stub.clone(),
            h.stub.clone(),
            h.stub.clone(),
            h.stub.clone(),
        ),
        h.events.clone(),
    )
    .step()
    .await
    .unwrap();
    assert!(!outcome.worked);
    assert_eq!(outcome.stage, ProcessingStage::Completed);
    assert_eq!(h.store.list_people(&acme).await.unwrap(), before);
    assert_eq!(h.stub.delivered().len(), 4 * 6);
}

#[tokio::test]
async fn empty_selection_parks_instead_of_requeueing() {
    let h = harness(StubGateway::new(3), SchedulerConfig::default()).await;
    let acme = WorkloadId::new("acme.com");
    h.scheduler
        .register(acme.clone(), WorkloadSeed::default(), RerunFlags::default())
        .await
        .unwrap();
    step_expect(&h, ProcessingStage::ProfilesScraped, Disposition::Requeue).await;

    h.scheduler.submit_selection(&acme, &[]).await.unwrap();
    step_expect(&h, ProcessingStage::ProfilesScraped, Disposition::Park).await;

    assert!(h.scheduler.run_once().await.is_none());
    let snapshot = h.scheduler.snapshot().await;
    assert_eq!(snapshot.waiting, vec![acme.clone()]);
    assert!(snapshot.ready.is_empty());
}

#[tokio::test]
async fn out_of_range_selection_is_rejected() {
    let h = harness(StubGateway::new(3), SchedulerConfig::default()).await;
    let acme = WorkloadId::new("acme.com");
    h.scheduler
        .register(acme.clone(), WorkloadSeed::default(), RerunFlags::default())
        .await
        .unwrap();
    step_expect(&h, ProcessingStage::ProfilesScraped, Disposition::Requeue).await;
    step_expect(&h, ProcessingStage::ProfilesScraped, Disposition::Park).await;

    assert!(h.scheduler.submit_selection(&acme, &[0, 3]).await.is_err());
    let status = h.scheduler.status(&acme).await.unwrap();
    assert!(status.state.chosen.is_empty());
    assert_eq!(status.slot, Some(Slot::Waiting));
}

#[tokio::test]
async fn rediscovery_does_not_duplicate_people() {
    let h = harness(StubGateway::new(5), SchedulerConfig::default()).await;
    let acme = WorkloadId::new("acme.com");
    h.scheduler
        .register(acme.clone(), WorkloadSeed::default(), RerunFlags::default())
        .await
        .unwrap();
    step_expect(&h, ProcessingStage::ProfilesScraped, Disposition::Requeue).await;

    // Force discovery to run again over the same candidates.
    h.scheduler
        .register(
            acme.clone(),
            WorkloadSeed::default(),
            RerunFlags {
                discover: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    h.scheduler
        .reset(&acme, ProcessingStage::NotStarted)
        .await
        .unwrap();
    step_expect(&h, ProcessingStage::ProfilesScraped, Disposition::Requeue).await;

    assert_eq!(h.stub.discover_calls(), 2);
    assert_eq!(h.store.list_people(&acme).await.unwrap().len(), 5);
    let state = h.scheduler.status(&acme).await.unwrap().state;
    assert_eq!(state.people.len(), 5);
    assert!(!state.rerun.discover, "rerun flag is consumed");
}

#[tokio::test]
async fn resending_after_a_reset_skips_delivered_addresses() {
    let h = harness(StubGateway::new(2), SchedulerConfig::default()).await;
    let acme = WorkloadId::new("acme.com");
    h.scheduler
        .register(acme.clone(), WorkloadSeed::default(), RerunFlags::default())
        .await
        .unwrap();
    step_expect(&h, ProcessingStage::ProfilesScraped, Disposition::Requeue).await;
    h.scheduler.submit_selection(&acme, &[0, 1]).await.unwrap();
    for stage in [
        ProcessingStage::ProfilesSelected,
        ProcessingStage::ProfilesProcessed,
        ProcessingStage::MessagesDrafted,
    ] {
        step_expect(&h, stage, Disposition::Requeue).await;
    }
    let people = h.store.list_people(&acme).await.unwrap();
    let approvals: Vec<ApprovedDraft> = people
        .iter()
        .map(|p| ApprovedDraft {
            name: p.person.name.clone(),
            subject: "Hello".into(),
            body: "Hi".into(),
            direct_message: None,
        })
        .collect();
    h.scheduler.submit_approved_drafts(&acme, &approvals).await.unwrap();
    step_expect(&h, ProcessingStage::MessagesApproved, Disposition::Requeue).await;
    step_expect(&h, ProcessingStage::Completed, Disposition::Retire).await;
    let sent = h.stub.delivered().len();
    assert_eq!(sent, 2 * 6);

    h.scheduler
        .reset(&acme, ProcessingStage::MessagesApproved)
        .await
        .unwrap();
    step_expect(&h, ProcessingStage::Completed, Disposition::Retire).await;
    assert_eq!(h.stub.delivered().len(), sent, "no address is mailed twice");
}

#[tokio::test]
async fn state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outreach.db");
    let acme = WorkloadId::new("acme.com");

    {
        let store: std::sync::Arc<dyn outreach::store::RecordStore> = std::sync::Arc::new(
            outreach::store::LibSqlBackend::new_local(&path).await.unwrap(),
        );
        let h = common::harness_with_store(store, StubGateway::new(4), SchedulerConfig::default());
        h.scheduler
            .register(acme.clone(), WorkloadSeed::default(), RerunFlags::default())
            .await
            .unwrap();
        step_expect(&h, ProcessingStage::ProfilesScraped, Disposition::Requeue).await;
        h.scheduler.submit_selection(&acme, &[1, 3]).await.unwrap();
    }

    let store: std::sync::Arc<dyn outreach::store::RecordStore> = std::sync::Arc::new(
        outreach::store::LibSqlBackend::new_local(&path).await.unwrap(),
    );
    let h = common::harness_with_store(store, StubGateway::new(4), SchedulerConfig::default());
    assert_eq!(h.scheduler.resume_all().await.unwrap(), 1);
    step_expect(&h, ProcessingStage::ProfilesSelected, Disposition::Requeue).await;

    let state = h.scheduler.status(&acme).await.unwrap().state;
    assert_eq!(state.chosen, vec![1, 3]);
    assert_eq!(h.stub.discover_calls(), 0, "discovery is not repeated");
}

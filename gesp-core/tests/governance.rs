use std::collections::BTreeSet;
use std::sync::Arc;

use gesp_core::*;
use pretty_assertions::assert_eq;
use uuid::Uuid;

const CHANNEL: u64 = 500;

struct Harness {
    entity: Uuid,
    store: Arc<MemoryStore>,
    presenter: Arc<RecordingPresenter>,
    gov: Arc<Governor>,
}

impl Harness {
    async fn new(members: impl IntoIterator<Item = u64>, rules: Rules) -> Self {
        let entity = Uuid::now_v7();
        let store = Arc::new(MemoryStore::new().with_members(entity, members));
        let presenter = Arc::new(RecordingPresenter::new());
        let gov = Arc::new(Governor::new(
            store.clone(),
            presenter.clone(),
            GespConfig::default(),
        ));
        gov.install_rules(entity, rules).await.unwrap();
        Self {
            entity,
            store,
            presenter,
            gov,
        }
    }

    fn action(&self, body: ActionBody) -> Action {
        Action::new(self.entity, body)
    }

    async fn initiate(&self, initiator: u64, body: ActionBody) -> Resolution {
        self.gov
            .initiate(self.entity, initiator, CHANNEL, self.action(body))
            .await
            .unwrap()
    }

    async fn ballot(&self, message_id: u64, voter: u64, ballot: Ballot) -> BallotOutcome {
        self.gov
            .record_ballot(message_id, voter, ballot)
            .await
            .unwrap()
    }

    async fn members(&self) -> BTreeSet<u64> {
        self.store.members(self.entity).await.unwrap()
    }
}

fn pending(resolution: Resolution) -> u64 {
    match resolution {
        Resolution::Pending { message_id } => message_id,
        other => panic!("expected a pending vote, got {other:?}"),
    }
}

fn open_ack() -> BallotOutcome {
    BallotOutcome::Ack {
        effect: BallotEffect::Recorded,
        resolution: None,
    }
}

#[tokio::test]
async fn test_majority_of_five_needs_three() {
    let h = Harness::new(1..=5, Rules::Majority { named: vec![] }).await;
    let id = pending(h.initiate(1, ActionBody::Join { candidate: 42 }).await);

    let shown = h.presenter.presented().unwrap();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].kind, VoteKind::Approval);
    assert_eq!(shown[0].channel, CHANNEL);

    assert_eq!(h.ballot(id, 1, Ballot::Yes).await, open_ack());
    assert_eq!(h.ballot(id, 2, Ballot::Yes).await, open_ack());
    assert!(!h.members().await.contains(&42));

    assert_eq!(
        h.ballot(id, 3, Ballot::Yes).await,
        BallotOutcome::Ack {
            effect: BallotEffect::Recorded,
            resolution: Some(Resolution::Applied),
        }
    );
    assert!(h.members().await.contains(&42));
    assert_eq!(h.presenter.closed_votes().unwrap(), vec![(id, true)]);

    // One-shot: later ballots find nothing.
    assert_eq!(h.ballot(id, 4, Ballot::Yes).await, BallotOutcome::NoSuchVote);
    assert_eq!(h.store.open_votes().unwrap(), 0);
}

#[tokio::test]
async fn test_no_ballots_do_not_count_towards_approval() {
    let h = Harness::new(1..=3, Rules::Majority { named: vec![] }).await;
    let id = pending(h.initiate(1, ActionBody::ServerAdd { server: 8 }).await);

    h.ballot(id, 1, Ballot::No).await;
    h.ballot(id, 2, Ballot::No).await;
    h.ballot(id, 3, Ballot::Yes).await;
    assert_eq!(h.store.open_votes().unwrap(), 1);

    let outcome = h.ballot(id, 2, Ballot::Yes).await;
    assert_eq!(
        outcome,
        BallotOutcome::Ack {
            effect: BallotEffect::Recorded,
            resolution: Some(Resolution::Applied),
        }
    );
    assert!(h.store.servers(h.entity).unwrap().contains(&8));
}

#[tokio::test]
async fn test_repeat_ballot_is_unchanged() {
    let h = Harness::new(1..=5, Rules::Majority { named: vec![] }).await;
    let id = pending(h.initiate(1, ActionBody::Join { candidate: 9 }).await);

    h.ballot(id, 1, Ballot::Yes).await;
    assert_eq!(
        h.ballot(id, 1, Ballot::Yes).await,
        BallotOutcome::Ack {
            effect: BallotEffect::Unchanged,
            resolution: None,
        }
    );
}

#[tokio::test]
async fn test_abstain_semantics() {
    let h = Harness::new(1..=3, Rules::Majority { named: vec![] }).await;
    let id = pending(h.initiate(1, ActionBody::Join { candidate: 9 }).await);

    assert_eq!(
        h.ballot(id, 1, Ballot::Abstain).await,
        BallotOutcome::Ack {
            effect: BallotEffect::Unchanged,
            resolution: None,
        }
    );

    h.ballot(id, 1, Ballot::Yes).await;
    assert_eq!(h.ballot(id, 1, Ballot::Abstain).await, open_ack());

    // 1 withdrew, so 2 alone is short of the two needed.
    h.ballot(id, 2, Ballot::Yes).await;
    assert_eq!(h.store.open_votes().unwrap(), 1);
    let decided = h.ballot(id, 3, Ballot::Yes).await;
    assert!(matches!(
        decided,
        BallotOutcome::Ack {
            resolution: Some(Resolution::Applied),
            ..
        }
    ));
}

#[tokio::test]
async fn test_ineligible_and_unknown_votes() {
    let h = Harness::new(1..=3, Rules::Majority { named: vec![] }).await;
    let id = pending(h.initiate(1, ActionBody::Join { candidate: 9 }).await);

    assert_eq!(h.ballot(id, 77, Ballot::Yes).await, BallotOutcome::Ineligible);
    assert_eq!(
        h.ballot(id + 1000, 1, Ballot::Yes).await,
        BallotOutcome::NoSuchVote
    );

    let record = h.store.load_vote(id).await.unwrap().unwrap();
    assert!(record.yes.is_empty());
}

#[tokio::test]
async fn test_dictator_rules() {
    let h = Harness::new([1, 2, 3], Rules::Dictator { named: vec![1] }).await;

    // The dictator's own actions pass without a vote.
    assert_eq!(
        h.initiate(1, ActionBody::Remove { candidate: 3 }).await,
        Resolution::Applied
    );
    assert!(!h.members().await.contains(&3));

    // Anyone else needs the dictator's confirmation; the first ballot decides.
    let id = pending(
        h.initiate(
            2,
            ActionBody::AttributeChange {
                field: "name".into(),
                value: "Night Shift".into(),
            },
        )
        .await,
    );
    assert_eq!(h.presenter.presented().unwrap()[0].kind, VoteKind::Confirm);
    assert_eq!(h.ballot(id, 2, Ballot::Yes).await, BallotOutcome::Ineligible);
    assert_eq!(
        h.ballot(id, 1, Ballot::No).await,
        BallotOutcome::Ack {
            effect: BallotEffect::Recorded,
            resolution: Some(Resolution::Rejected),
        }
    );
    assert_eq!(h.store.attribute(h.entity, "name").unwrap(), None);
}

#[tokio::test]
async fn test_invite_chains_candidate_confirmation() {
    let h = Harness::new([1], Rules::Majority { named: vec![] }).await;
    let first = pending(h.initiate(1, ActionBody::Invite { candidate: 50 }).await);

    let chained = h.ballot(first, 1, Ballot::Yes).await;
    let BallotOutcome::Ack {
        resolution: Some(Resolution::Pending { message_id: second }),
        ..
    } = chained
    else {
        panic!("expected a second vote, got {chained:?}");
    };
    assert_ne!(first, second);
    assert!(!h.members().await.contains(&50));

    let shown = h.presenter.presented().unwrap();
    assert_eq!(shown[1].kind, VoteKind::Confirm);

    // Only the candidate can accept.
    assert_eq!(h.ballot(second, 1, Ballot::Yes).await, BallotOutcome::Ineligible);
    assert!(matches!(
        h.ballot(second, 50, Ballot::Yes).await,
        BallotOutcome::Ack {
            resolution: Some(Resolution::Applied),
            ..
        }
    ));
    assert!(h.members().await.contains(&50));
}

#[tokio::test]
async fn test_consensus_rejects_on_any_no() {
    let h = Harness::new(
        [1, 2, 3],
        Rules::Custom {
            named: vec![],
            source: "(vote-consensus)".into(),
        },
    )
    .await;
    let id = pending(h.initiate(1, ActionBody::ServerAdd { server: 4 }).await);

    h.ballot(id, 1, Ballot::Yes).await;
    h.ballot(id, 2, Ballot::No).await;
    assert_eq!(h.store.open_votes().unwrap(), 1);
    assert_eq!(
        h.ballot(id, 3, Ballot::Yes).await,
        BallotOutcome::Ack {
            effect: BallotEffect::Recorded,
            resolution: Some(Resolution::Rejected),
        }
    );
    assert!(h.store.servers(h.entity).unwrap().is_empty());
}

#[tokio::test]
async fn test_rules_change_recompiles() {
    let h = Harness::new([1, 2], Rules::Dictator { named: vec![1] }).await;

    let rules = h
        .gov
        .compile_rules(h.entity, "(in (initiator) (members))")
        .await
        .unwrap();
    assert_eq!(
        h.initiate(1, ActionBody::RulesChange { rules }).await,
        Resolution::Applied
    );

    // Member 2 no longer needs the old dictator.
    assert_eq!(
        h.initiate(2, ActionBody::ServerAdd { server: 3 }).await,
        Resolution::Applied
    );
    // Outsiders are rejected outright.
    assert_eq!(
        h.initiate(99, ActionBody::ServerAdd { server: 4 }).await,
        Resolution::Rejected
    );

    let stored = h.store.load_rules(h.entity).await.unwrap().unwrap();
    assert_eq!(stored.variant_tag, RulesKind::Custom);
    assert_eq!(stored.named, vec![1]);
}

#[tokio::test]
async fn test_bad_rules_leave_old_rules_in_force() {
    let h = Harness::new([1, 2], Rules::Dictator { named: vec![1] }).await;
    assert!(h.gov.compile_rules(h.entity, "(add 1 2)").await.is_err());
    assert!(matches!(
        h.initiate(2, ActionBody::ServerAdd { server: 3 }).await,
        Resolution::Pending { .. }
    ));
}

#[tokio::test]
async fn test_vote_survives_restart() {
    let h = Harness::new(1..=3, Rules::Majority { named: vec![] }).await;
    let id = pending(h.initiate(1, ActionBody::Join { candidate: 11 }).await);
    h.ballot(id, 1, Ballot::Yes).await;

    // A fresh orchestrator over the same store knows nothing in memory.
    let gov = Governor::new(
        h.store.clone(),
        Arc::new(RecordingPresenter::new()),
        GespConfig::default(),
    );
    let outcome = gov.record_ballot(id, 2, Ballot::Yes).await.unwrap();
    assert_eq!(
        outcome,
        BallotOutcome::Ack {
            effect: BallotEffect::Recorded,
            resolution: Some(Resolution::Applied),
        }
    );
    assert!(h.members().await.contains(&11));
}

#[tokio::test]
async fn test_vote_record_json_round_trip() {
    let h = Harness::new(1..=4, Rules::Majority { named: vec![] }).await;
    let id = pending(h.initiate(2, ActionBody::Remove { candidate: 4 }).await);
    h.ballot(id, 3, Ballot::No).await;

    let record = h.store.load_vote(id).await.unwrap().unwrap();
    let json = record.to_json().unwrap();
    let restored = VoteRecord::from_json(&json).unwrap();
    assert_eq!(restored, record);

    let vote = restored.into_vote().unwrap();
    assert_eq!(vote.kind, VoteKind::Approval);
    assert_eq!(vote.eligible, Eligibility::Count(3));
    assert_eq!(vote.context.initiator, 2);
    assert_eq!(vote.context.candidate, Some(4));
    assert!(vote.no.contains(&3));
}

#[tokio::test]
async fn test_concurrent_deciding_ballots_resolve_once() {
    let h = Harness::new(1..=5, Rules::Majority { named: vec![] }).await;
    let id = pending(h.initiate(1, ActionBody::ServerAdd { server: 6 }).await);
    h.ballot(id, 1, Ballot::Yes).await;
    h.ballot(id, 2, Ballot::Yes).await;

    let handles: Vec<_> = (3..=5)
        .map(|voter| {
            let gov = h.gov.clone();
            tokio::spawn(async move { gov.record_ballot(id, voter, Ballot::Yes).await })
        })
        .collect();

    let mut applied = 0;
    for handle in handles {
        if let BallotOutcome::Ack {
            resolution: Some(Resolution::Applied),
            ..
        } = handle.await.unwrap().unwrap()
        {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(h.presenter.closed_votes().unwrap().len(), 1);
}

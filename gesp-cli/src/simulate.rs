//! End-to-end majority vote against the in-memory store.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use gesp_core::{
    Action, ActionBody, Ballot, BallotOutcome, GespConfig, Governor, MaskStore, MemoryStore,
    RecordingPresenter, Resolution, Rules,
};

const CANDIDATE: u64 = 1_000;

pub async fn run(config: GespConfig, members: u64, yes: u64) -> Result<()> {
    let entity = Uuid::now_v7();
    let store = Arc::new(MemoryStore::new().with_members(entity, 1..=members));
    let gov = Governor::new(store.clone(), Arc::new(RecordingPresenter::new()), config);
    gov.install_rules(entity, Rules::Majority { named: vec![] })
        .await?;
    info!(entity = %entity, members, "Simulating majority vote");

    let action = Action::new(entity, ActionBody::Join { candidate: CANDIDATE });
    println!("initiate: {action}");
    let message_id = match gov.initiate(entity, 1, 0, action).await? {
        Resolution::Pending { message_id } => message_id,
        other => {
            println!("resolved without a vote: {other:?}");
            return Ok(());
        }
    };
    println!("vote opened as message {message_id}");

    for voter in 1..=yes.min(members) {
        let outcome = gov.record_ballot(message_id, voter, Ballot::Yes).await?;
        println!("ballot yes from {voter}: {outcome:?}");
        if let BallotOutcome::Ack {
            resolution: Some(_),
            ..
        } = outcome
        {
            break;
        }
    }

    let after = store.members(entity).await?;
    println!(
        "candidate {CANDIDATE} is {}a member",
        if after.contains(&CANDIDATE) { "" } else { "not " }
    );
    Ok(())
}

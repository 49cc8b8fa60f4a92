use boardsync_core::{
    BoardSnapshot, BroadcastEvent, Card, CardPatch, CardUpdates, Disposition, Intent, List, MutationOutcome,
    RawEvent, Resolution, SyncConfig, SyncEngine, TransportError,
};
use chrono::{Duration, Utc};
use serde_json::json;

fn list(id: &str, pos: f64) -> List {
    List {
        id: id.to_string(),
        name: format!("List {id}"),
        id_board: Some("board-1".to_string()),
        pos,
        closed: false,
    }
}

fn engine_with(cards: Vec<Card>) -> SyncEngine {
    let mut engine = SyncEngine::new(SyncConfig::default());
    engine.load(
        BoardSnapshot {
            lists: vec![list("L1", 1.0), list("L2", 2.0), list("L3", 3.0)],
            cards,
        },
        Utc::now(),
    );
    engine
}

fn occurrences(engine: &SyncEngine, card_id: &str) -> usize {
    engine
        .snapshot()
        .iter()
        .flat_map(|l| l.cards.iter())
        .filter(|c| c.id == card_id)
        .count()
}

#[test]
fn duplicate_created_broadcast_leaves_one_card() {
    let mut engine = engine_with(vec![]);
    let now = Utc::now();
    let event = RawEvent::Broadcast(BroadcastEvent::CardCreated(Card::new("card1", "L1", "First")));

    assert!(matches!(engine.ingest(event.clone(), now).unwrap(), Disposition::Applied(_)));
    assert_eq!(engine.ingest(event, now).unwrap(), Disposition::Duplicate);

    assert_eq!(engine.store().cards("L1").len(), 1);
    assert_eq!(engine.store().locate("card1"), Some(("L1", 0)));
}

#[test]
fn failed_optimistic_move_returns_card_to_original_slot() {
    let mut engine = engine_with(vec![
        Card::new("card0", "L1", "zero"),
        Card::new("card1", "L1", "one"),
        Card::new("card2", "L1", "two"),
        Card::new("x", "L2", "x"),
    ]);
    let now = Utc::now();
    let before = engine.snapshot();

    let submitted = engine
        .submit(
            Intent::MoveCard {
                card_id: "card1".into(),
                to_list_id: "L2".into(),
                index: Some(0),
            },
            now,
        )
        .unwrap();
    assert_eq!(engine.store().locate("card1"), Some(("L2", 0)));

    let resolution = engine
        .settle(
            submitted.correlation,
            Err(TransportError::with_status("moveCard", 503, "unavailable")),
            now + Duration::seconds(1),
        )
        .unwrap();
    assert!(matches!(resolution, Resolution::RolledBack { .. }));
    assert_eq!(engine.store().locate("card1"), Some(("L1", 1)));
    assert_eq!(engine.snapshot(), before);
}

#[test]
fn late_update_after_delete_does_not_resurrect() {
    let mut engine = engine_with(vec![Card::new("card1", "L1", "one")]);
    let now = Utc::now();
    engine
        .ingest(RawEvent::Broadcast(BroadcastEvent::CardDeleted { card_id: "card1".into() }), now)
        .unwrap();

    let late = RawEvent::Broadcast(BroadcastEvent::CardUpdated {
        card_id: "card1".into(),
        updates: CardUpdates {
            name: Some("x".into()),
            ..CardUpdates::default()
        },
    });
    let disposition = engine.ingest(late, now + Duration::seconds(2)).unwrap();

    assert_eq!(disposition, Disposition::Tombstoned);
    assert_eq!(occurrences(&engine, "card1"), 0);
}

#[test]
fn webhook_move_corrects_drifted_location() {
    let mut engine = engine_with(vec![Card::new("card1", "L3", "one"), Card::new("other", "L2", "o")]);
    let payload = json!({
        "action": {
            "type": "updateCard",
            "date": "2024-06-01T09:30:00.000Z",
            "data": {
                "card": { "id": "card1", "idList": "L2" },
                "old": { "idList": "L1" },
                "listBefore": { "id": "L1" },
                "listAfter": { "id": "L2" }
            }
        }
    });

    let disposition = engine.ingest(RawEvent::Webhook(payload), Utc::now()).unwrap();
    let Disposition::Applied(change) = disposition else {
        panic!("expected the move to apply, got {disposition:?}");
    };
    assert_eq!(change.list_ids(), vec!["L3", "L2"]);
    assert!(engine.store().cards("L3").is_empty());
    assert_eq!(engine.store().locate("card1"), Some(("L2", 1)));
    assert_eq!(occurrences(&engine, "card1"), 1);
}

#[test]
fn moves_land_in_exactly_one_list() {
    let cards = vec![
        Card::new("a", "L1", "a"),
        Card::new("b", "L2", "b"),
        Card::new("c", "L3", "c"),
    ];
    let now = Utc::now();
    for (claimed_from, to) in [("L1", "L2"), ("L2", "L2"), ("L3", "L1"), ("L1", "L3")] {
        let mut engine = engine_with(cards.clone());
        let payload = json!({
            "action": { "type": "updateCard", "data": {
                "card": { "id": "a", "idList": to },
                "old": { "idList": claimed_from },
                "listBefore": { "id": claimed_from },
                "listAfter": { "id": to } } }
        });
        engine.ingest(RawEvent::Webhook(payload), now).unwrap();
        assert_eq!(occurrences(&engine, "a"), 1, "{claimed_from} -> {to}");
        assert_eq!(engine.store().locate("a").map(|(l, _)| l), Some(to));
        assert!(engine.store().is_consistent());
    }
}

#[test]
fn move_past_end_appends() {
    let mut engine = engine_with(vec![Card::new("a", "L1", "a"), Card::new("b", "L2", "b")]);
    engine
        .submit(
            Intent::MoveCard {
                card_id: "a".into(),
                to_list_id: "L2".into(),
                index: Some(99),
            },
            Utc::now(),
        )
        .unwrap();
    assert_eq!(engine.store().locate("a"), Some(("L2", 1)));
}

#[test]
fn optimistic_create_is_rekeyed_and_echo_ignored() {
    let mut engine = engine_with(vec![]);
    let now = Utc::now();
    let submitted = engine
        .submit(
            Intent::CreateCard {
                list_id: "L1".into(),
                name: "Fresh".into(),
                desc: Some("body".into()),
            },
            now,
        )
        .unwrap();
    let placeholder = submitted.provisional_id.clone().unwrap();
    assert!(engine.store().contains(&placeholder));

    let confirmed = Card::new("srv-1", "L1", "Fresh").with_desc("body");
    let resolution = engine
        .settle(submitted.correlation, Ok(MutationOutcome::Created(confirmed.clone())), now)
        .unwrap();
    let Resolution::Confirmed { mirror, .. } = resolution else {
        panic!("expected confirmation");
    };
    assert_eq!(mirror, BroadcastEvent::CardCreated(confirmed.clone()));
    assert!(!engine.store().contains(&placeholder));
    assert_eq!(engine.store().locate("srv-1"), Some(("L1", 0)));

    let echo = RawEvent::Broadcast(BroadcastEvent::CardCreated(confirmed));
    assert_eq!(engine.ingest(echo, now).unwrap(), Disposition::Duplicate);
    assert_eq!(occurrences(&engine, "srv-1"), 1);
}

#[test]
fn failed_create_removes_placeholder() {
    let mut engine = engine_with(vec![]);
    let now = Utc::now();
    let submitted = engine
        .submit(
            Intent::CreateCard {
                list_id: "L2".into(),
                name: "Doomed".into(),
                desc: None,
            },
            now,
        )
        .unwrap();
    engine
        .settle(submitted.correlation, Err(TransportError::new("createCard", "connection refused")), now)
        .unwrap();
    assert!(engine.store().cards("L2").is_empty());
}

#[test]
fn failed_delete_restores_card_and_accepts_later_updates() {
    let mut engine = engine_with(vec![Card::new("a", "L1", "a"), Card::new("b", "L1", "b")]);
    let now = Utc::now();
    let submitted = engine
        .submit(Intent::DeleteCard { card_id: "a".into() }, now)
        .unwrap();
    assert!(!engine.store().contains("a"));

    engine
        .settle(submitted.correlation, Err(TransportError::with_status("deleteCard", 401, "unauthorized")), now)
        .unwrap();
    assert_eq!(engine.store().locate("a"), Some(("L1", 0)));

    let rename = RawEvent::Broadcast(BroadcastEvent::CardUpdated {
        card_id: "a".into(),
        updates: CardUpdates {
            name: Some("renamed".into()),
            ..CardUpdates::default()
        },
    });
    assert!(matches!(engine.ingest(rename, now).unwrap(), Disposition::Applied(_)));
}

#[test]
fn timed_out_mutation_rolls_back_then_late_success_applies() {
    let mut engine = engine_with(vec![Card::new("a", "L1", "a")]);
    let t0 = Utc::now();
    let submitted = engine
        .submit(
            Intent::UpdateCard {
                card_id: "a".into(),
                fields: CardPatch::name("new"),
            },
            t0,
        )
        .unwrap();

    let rolled = engine.tick(t0 + Duration::seconds(16));
    assert!(matches!(rolled.as_slice(), [Resolution::Expired { .. }]));
    assert_eq!(engine.store().card("a").map(|c| c.name.as_str()), Some("a"));

    let late = engine
        .settle(
            submitted.correlation,
            Ok(MutationOutcome::Updated(Card::new("a", "L1", "new"))),
            t0 + Duration::seconds(17),
        )
        .unwrap();
    assert!(matches!(late, Resolution::Late { .. }));
    assert_eq!(engine.store().card("a").map(|c| c.name.as_str()), Some("new"));
}

#[test]
fn intent_for_unknown_card_is_rejected() {
    let mut engine = engine_with(vec![]);
    let err = engine
        .submit(Intent::ArchiveCard { card_id: "nope".into() }, Utc::now())
        .unwrap_err();
    assert!(err.is_stale());
    assert!(engine.tracker().is_empty());
}

#[test]
fn created_after_delete_supersedes_tombstone() {
    let mut engine = engine_with(vec![Card::new("a", "L1", "a")]);
    let now = Utc::now();
    engine
        .ingest(RawEvent::Broadcast(BroadcastEvent::CardArchived { card_id: "a".into() }), now)
        .unwrap();
    let reopen = json!({
        "action": { "type": "updateCard", "data": {
            "card": { "id": "a", "name": "a", "closed": false },
            "old": { "closed": true },
            "list": { "id": "L2" } } }
    });
    assert!(matches!(
        engine.ingest(RawEvent::Webhook(reopen), now + Duration::seconds(3)).unwrap(),
        Disposition::Applied(_)
    ));
    assert_eq!(engine.store().locate("a"), Some(("L2", 0)));
}

fn relist(card_id: &str, list_id: &str) -> RawEvent {
    RawEvent::Broadcast(BroadcastEvent::CardUpdated {
        card_id: card_id.into(),
        updates: CardUpdates {
            id_list: Some(list_id.into()),
            ..CardUpdates::default()
        },
    })
}

fn rename(card_id: &str, name: &str) -> RawEvent {
    RawEvent::Broadcast(BroadcastEvent::CardUpdated {
        card_id: card_id.into(),
        updates: CardUpdates {
            name: Some(name.into()),
            ..CardUpdates::default()
        },
    })
}

#[test]
fn moving_back_and_forth_applies_every_step() {
    let mut engine = engine_with(vec![Card::new("a", "L1", "A")]);
    let now = Utc::now();

    for (step, target) in ["L2", "L1", "L2"].into_iter().enumerate() {
        let disposition = engine.ingest(relist("a", target), now).unwrap();
        assert!(
            matches!(disposition, Disposition::Applied(_)),
            "step {step} to {target} gave {disposition:?}"
        );
    }
    assert_eq!(engine.store().locate("a"), Some(("L2", 0)));

    // A list change naming the current list carries nothing new.
    assert_eq!(engine.ingest(relist("a", "L2"), now).unwrap(), Disposition::Ignored);
    assert_eq!(occurrences(&engine, "a"), 1);
}

#[test]
fn renaming_back_to_an_earlier_name_is_applied() {
    let mut engine = engine_with(vec![Card::new("a", "L1", "A")]);
    let now = Utc::now();

    for name in ["x", "y", "x"] {
        assert!(matches!(engine.ingest(rename("a", name), now).unwrap(), Disposition::Applied(_)));
    }
    assert_eq!(engine.store().card("a").map(|c| c.name.as_str()), Some("x"));
    assert_eq!(engine.ingest(rename("a", "x"), now).unwrap(), Disposition::Duplicate);
}

#[test]
fn unarchive_after_archive_restores_the_card() {
    let mut engine = engine_with(vec![]);
    let now = Utc::now();

    let created = RawEvent::Broadcast(BroadcastEvent::CardCreated(Card::new("c1", "L1", "Task")));
    assert!(matches!(engine.ingest(created, now).unwrap(), Disposition::Applied(_)));
    let archived = RawEvent::Broadcast(BroadcastEvent::CardArchived { card_id: "c1".into() });
    assert!(matches!(engine.ingest(archived, now).unwrap(), Disposition::Applied(_)));
    assert!(!engine.store().contains("c1"));

    let unarchive = RawEvent::Webhook(json!({
        "action": { "type": "updateCard", "data": {
            "card": { "id": "c1", "name": "Task", "closed": false },
            "old": { "closed": true },
            "list": { "id": "L1" } } }
    }));
    let disposition = engine.ingest(unarchive, now + Duration::seconds(1)).unwrap();
    assert!(matches!(disposition, Disposition::Applied(_)), "unarchive gave {disposition:?}");
    assert_eq!(engine.store().locate("c1"), Some(("L1", 0)));
}

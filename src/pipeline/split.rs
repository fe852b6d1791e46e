use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::model::{surrogate_id, EnrichedContact, Entity, EntityKind, EventPointer};

use super::{next, SharedRx};

/// Looks up the transaction a pointer addresses inside a task-log value.
pub fn locate_transaction<'a>(task_log: &'a Value, pointer: &EventPointer) -> Option<&'a Value> {
    task_log
        .get(pointer.task_log_index)?
        .get("transactions")?
        .get(pointer.transaction_index)
}

/// Denormalizes one enriched contact into sink entities: the contact row
/// with the task-log removed, then each addressed transaction followed by
/// its connections and their recordings, every child carrying its parent's
/// surrogate id. An empty pointer list imports the whole task-log.
pub fn split_contact(mut enriched: EnrichedContact) -> Vec<Entity> {
    let task_log = enriched
        .contact
        .remove("$task_log")
        .unwrap_or_else(|| Value::Array(Vec::new()));
    let contact_id = enriched
        .contact
        .get("$id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    let mut out = vec![Entity {
        kind: EntityKind::Contact,
        data: enriched.contact,
    }];

    if enriched.pointers.is_empty() {
        for entry in task_log.as_array().map(Vec::as_slice).unwrap_or_default() {
            for transaction in entry
                .get("transactions")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
            {
                split_transaction(&contact_id, transaction, &mut out);
            }
        }
    } else {
        for pointer in &enriched.pointers {
            let Some(transaction) = locate_transaction(&task_log, pointer) else {
                warn!(contact_id = %contact_id, pointer = %pointer, "event pointer outside task-log, skipping");
                continue;
            };
            split_transaction(&contact_id, transaction, &mut out);
        }
    }
    out
}

fn split_transaction(contact_id: &str, transaction: &Value, out: &mut Vec<Entity>) {
    let Some(obj) = transaction.as_object() else {
        warn!(contact_id, "task-log slot is not a transaction object, skipping");
        return;
    };
    let mut data = obj.clone();
    let Some(fired) = data.get("fired").and_then(Value::as_str).map(str::to_owned) else {
        warn!(contact_id, "transaction without fired timestamp, skipping");
        return;
    };
    let seqnr = data.get("sequence_nr").map(number_repr).unwrap_or_default();
    let id = surrogate_id(&[contact_id, &fired, &seqnr]);
    data.insert("$id".to_owned(), Value::String(id.clone()));
    data.insert("$contact_id".to_owned(), Value::String(contact_id.to_owned()));
    let connections = data.remove("connections");
    out.push(Entity {
        kind: EntityKind::Transaction,
        data,
    });

    for connection in connections
        .as_ref()
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
    {
        split_connection(&id, connection, out);
    }
}

fn split_connection(transaction_id: &str, connection: &Value, out: &mut Vec<Entity>) {
    let Some(obj) = connection.as_object() else {
        return;
    };
    let mut data = obj.clone();
    let Some(fired) = data.get("fired").and_then(Value::as_str).map(str::to_owned) else {
        warn!(transaction_id, "connection without fired timestamp, skipping");
        return;
    };
    let id = surrogate_id(&[transaction_id, &fired]);
    data.insert("$id".to_owned(), Value::String(id.clone()));
    data.insert(
        "$transaction_id".to_owned(),
        Value::String(transaction_id.to_owned()),
    );
    let recordings = data.remove("recordings");
    out.push(Entity {
        kind: EntityKind::Connection,
        data,
    });

    for recording in recordings
        .as_ref()
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
    {
        split_recording(&id, recording, out);
    }
}

fn split_recording(connection_id: &str, recording: &Value, out: &mut Vec<Entity>) {
    let Some(obj) = recording.as_object() else {
        return;
    };
    let mut data = obj.clone();
    let Some(location) = data
        .get("location")
        .and_then(Value::as_str)
        .map(str::to_owned)
    else {
        warn!(connection_id, "recording without location, skipping");
        return;
    };
    let id = surrogate_id(&[connection_id, &location]);
    data.insert("$id".to_owned(), Value::String(id));
    data.insert(
        "$connection_id".to_owned(),
        Value::String(connection_id.to_owned()),
    );
    out.push(Entity {
        kind: EntityKind::Recording,
        data,
    });
}

fn number_repr(value: &Value) -> String {
    match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

pub fn spawn_splitters(
    rx: SharedRx<EnrichedContact>,
    entity_tx: mpsc::Sender<Entity>,
    count: usize,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|_| {
            let rx = rx.clone();
            let entity_tx = entity_tx.clone();
            tokio::spawn(async move {
                while let Some(enriched) = next(&rx).await {
                    for entity in split_contact(enriched) {
                        if entity_tx.send(entity).await.is_err() {
                            return;
                        }
                    }
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventState;
    use serde_json::json;

    fn contact_with_task_log(task_log: Value) -> EnrichedContact {
        let contact = json!({
            "$id": "c1",
            "$phone": "+4930123",
            "$task_log": task_log,
        });
        EnrichedContact {
            contact: contact.as_object().cloned().unwrap(),
            pointers: Vec::new(),
        }
    }

    fn kinds(entities: &[Entity]) -> Vec<EntityKind> {
        entities.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn whole_task_log_import_splits_every_level() {
        let task_log = json!([
            {"transactions": [
                {"fired": "2024-05-01T10:00:00", "sequence_nr": 1, "type": "call",
                 "connections": [
                    {"fired": "2024-05-01T10:00:05",
                     "recordings": [{"location": "https://store/a.wav"}]}
                 ]},
                {"fired": "2024-05-01T10:05:00", "sequence_nr": 2, "type": "update"},
            ]},
            {"transactions": [
                {"fired": "2024-05-01T11:00:00", "sequence_nr": 3, "type": "call"},
            ]},
        ]);
        let entities = split_contact(contact_with_task_log(task_log));
        assert_eq!(
            kinds(&entities),
            vec![
                EntityKind::Contact,
                EntityKind::Transaction,
                EntityKind::Connection,
                EntityKind::Recording,
                EntityKind::Transaction,
                EntityKind::Transaction,
            ]
        );
    }

    #[test]
    fn contact_row_loses_the_task_log() {
        let entities = split_contact(contact_with_task_log(json!([])));
        assert_eq!(entities.len(), 1);
        assert!(!entities[0].data.contains_key("$task_log"));
        assert_eq!(entities[0].data.get("$phone"), Some(&json!("+4930123")));
    }

    #[test]
    fn surrogate_ids_chain_parent_to_child() {
        let task_log = json!([
            {"transactions": [
                {"fired": "2024-05-01T10:00:00", "sequence_nr": 7,
                 "connections": [
                    {"fired": "2024-05-01T10:00:05",
                     "recordings": [{"location": "loc1"}]}
                 ]},
            ]},
        ]);
        let entities = split_contact(contact_with_task_log(task_log));
        let tx_id = surrogate_id(&["c1", "2024-05-01T10:00:00", "7"]);
        assert_eq!(entities[1].data.get("$id"), Some(&json!(tx_id)));
        assert_eq!(entities[1].data.get("$contact_id"), Some(&json!("c1")));

        let conn_id = surrogate_id(&[&tx_id, "2024-05-01T10:00:05"]);
        assert_eq!(entities[2].data.get("$id"), Some(&json!(conn_id)));
        assert_eq!(entities[2].data.get("$transaction_id"), Some(&json!(tx_id)));
        assert!(!entities[2].data.contains_key("recordings"));

        let rec_id = surrogate_id(&[&conn_id, "loc1"]);
        assert_eq!(entities[3].data.get("$id"), Some(&json!(rec_id)));
        assert_eq!(
            entities[3].data.get("$connection_id"),
            Some(&json!(conn_id))
        );
    }

    #[test]
    fn missing_sequence_nr_hashes_without_it() {
        let task_log = json!([
            {"transactions": [{"fired": "2024-05-01T10:00:00"}]},
        ]);
        let entities = split_contact(contact_with_task_log(task_log));
        let expected = surrogate_id(&["c1", "2024-05-01T10:00:00", ""]);
        assert_eq!(entities[1].data.get("$id"), Some(&json!(expected)));
    }

    #[test]
    fn pointers_select_individual_transactions() {
        let task_log = json!([
            {"transactions": [
                {"fired": "2024-05-01T10:00:00", "type": "call"},
                {"fired": "2024-05-01T10:05:00", "type": "update"},
            ]},
        ]);
        let mut enriched = contact_with_task_log(task_log);
        enriched.pointers = vec![EventPointer {
            task_log_index: 0,
            transaction_index: 1,
            state: EventState::New,
        }];
        let entities = split_contact(enriched);
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[1].data.get("type"), Some(&json!("update")));
    }

    #[test]
    fn out_of_range_pointers_are_skipped_not_fatal() {
        let task_log = json!([
            {"transactions": [{"fired": "2024-05-01T10:00:00"}]},
        ]);
        let mut enriched = contact_with_task_log(task_log);
        enriched.pointers = vec![
            EventPointer {
                task_log_index: 5,
                transaction_index: 0,
                state: EventState::New,
            },
            EventPointer {
                task_log_index: 0,
                transaction_index: 9,
                state: EventState::Updated,
            },
            EventPointer {
                task_log_index: 0,
                transaction_index: 0,
                state: EventState::New,
            },
        ];
        let entities = split_contact(enriched);
        assert_eq!(kinds(&entities), vec![EntityKind::Contact, EntityKind::Transaction]);
    }

    #[test]
    fn transactions_without_fired_are_skipped() {
        let task_log = json!([
            {"transactions": [{"type": "call"}, {"fired": "2024-05-01T10:00:00"}]},
        ]);
        let entities = split_contact(contact_with_task_log(task_log));
        assert_eq!(entities.len(), 2);
    }
}

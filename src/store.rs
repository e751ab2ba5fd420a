use std::ops::Deref;

use mongodb::{ClientSession, Client, Collection, Database};
use rocket::tokio::sync::broadcast;

use crate::data::notification::Notification;
use crate::resp::problem::Problem;

const EVENT_CAPACITY: usize = 256;

/// Database handle shared by every workflow.
///
/// Plain lookups go through the `*DbExt` traits implemented for [`Database`] (reachable through
/// `Deref`); multi-document workflows open a [`Transaction`] so that either every write of the
/// workflow lands or none does.
#[derive(Debug, Clone)]
pub struct Store {
    client: Client,
    db: Database,
    use_transactions: bool,
    events: broadcast::Sender<Notification>,
}

impl Store {
    pub fn new(client: Client, db_name: &str, use_transactions: bool) -> Store {
        let db = client.database(db_name);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Store {
            client,
            db,
            use_transactions,
            events,
        }
    }

    pub async fn begin(&self) -> Result<Transaction<'_>, Problem> {
        let mut session = self.client.start_session(None).await?;
        if self.use_transactions {
            session.start_transaction(None).await?;
        }

        Ok(Transaction {
            store: self,
            session,
            transactional: self.use_transactions,
            outbox: vec![],
        })
    }

    /// Live feed of newly stored notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }

    pub fn publish(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            // no subscribers is fine
            let _ = self.events.send(notification);
        }
    }
}

impl Deref for Store {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

pub struct Transaction<'s> {
    store: &'s Store,
    session: ClientSession,
    transactional: bool,
    outbox: Vec<Notification>,
}

impl<'s> Transaction<'s> {
    pub fn collection<T>(&self, name: &str) -> Collection<T> {
        self.store.db.collection(name)
    }

    pub fn session(&mut self) -> &mut ClientSession {
        &mut self.session
    }

    /// Queues a stored notification for live delivery once the transaction commits.
    pub fn announce(&mut self, notification: Notification) {
        self.outbox.push(notification);
    }

    /// Commits when `result` is `Ok`, aborts otherwise.
    pub async fn finish<T>(mut self, result: Result<T, Problem>) -> Result<T, Problem> {
        match result {
            Ok(value) => {
                if self.transactional {
                    self.session.commit_transaction().await?;
                }
                self.store.publish(self.outbox);
                Ok(value)
            }
            Err(problem) => {
                if self.transactional {
                    if let Err(e) = self.session.abort_transaction().await {
                        tracing::warn!("Unable to abort transaction: {}", e);
                    }
                } else {
                    tracing::warn!("Workflow failed without a transaction: {}", problem);
                }
                Err(problem)
            }
        }
    }
}

/// Store on a throwaway database of the server named by `MONGODB_URI`.
///
/// Tests that need a live server return early when it isn't set.
#[cfg(test)]
pub(crate) async fn test_store() -> Option<Store> {
    let uri = std::env::var("MONGODB_URI").ok()?;
    let client = Client::with_uri_str(&uri).await.expect("valid MONGODB_URI");
    let use_transactions = std::env::var("MONGODB_TRANSACTIONS")
        .map(|it| it == "true")
        .unwrap_or(false);

    let name = format!("capstone_test_{}", crate::util::new_id().replace('-', ""));
    let store = Store::new(client, &name, use_transactions);
    crate::data::ensure_indexes(&store)
        .await
        .expect("indexes created");
    Some(store)
}

#[cfg(test)]
pub(crate) async fn drop_test_store(store: Store) {
    let db: &Database = &store;
    db.drop(None).await.expect("test database dropped");
}

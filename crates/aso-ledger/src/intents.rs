use chrono::Utc;
use tracing::info;

use aso_core::id::IntentId;
use aso_core::types::{Intent, IntentFilter, IntentTransition, NewIntent};

use crate::ledger::{Ledger, INTENTS};
use crate::LedgerError;

/// Intent records and their approval lifecycle.
#[derive(Clone)]
pub struct IntentStore {
    ledger: Ledger,
}

impl IntentStore {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    /// Stores a new `pending` intent in one atomic insert.
    pub fn create(&self, input: NewIntent) -> Result<Intent, LedgerError> {
        let intent = Intent::new(IntentId::generate(), input, Utc::now());
        self.ledger.insert_new(INTENTS, intent.id.as_str(), &intent)?;
        info!(
            id = %intent.id,
            project = %intent.project,
            author = %intent.author,
            "intent created"
        );
        Ok(intent)
    }

    pub fn get_by_id(&self, id: &IntentId) -> Result<Option<Intent>, LedgerError> {
        self.ledger.get(INTENTS, id.as_str())
    }

    /// Intents matching every set field of `filter`, newest first.
    pub fn list(&self, filter: &IntentFilter) -> Result<Vec<Intent>, LedgerError> {
        let mut intents: Vec<Intent> = self
            .ledger
            .scan(INTENTS)?
            .into_iter()
            .filter(|i| filter.matches(i))
            .collect();
        intents.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(intents)
    }

    /// Moves an intent along its lifecycle.
    ///
    /// `Ok(None)` means no intent has this id. A transition the lifecycle does
    /// not allow, or an approval/rejection without its metadata, is an error
    /// and leaves the record unchanged.
    pub fn update_status(
        &self,
        id: &IntentId,
        transition: &IntentTransition,
    ) -> Result<Option<Intent>, LedgerError> {
        let updated = self.ledger.update(INTENTS, id.as_str(), |intent: &mut Intent| {
            intent.apply(transition, Utc::now())?;
            Ok(())
        })?;
        if let Some(intent) = &updated {
            info!(id = %intent.id, status = %intent.status, "intent status updated");
        }
        Ok(updated)
    }
}

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// Review outcome of a credential request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Pending,
    Accepted,
    Denied,
}

/// Decides how credential requests are reviewed.
///
/// The issuer reports every new ticket through [IssuerBackend::create_ticket]
/// and asks for its status whenever a holder polls.
pub trait IssuerBackend: std::fmt::Debug + Send + Sync {
    fn create_ticket(
        &mut self,
        ticket: u64,
        credential_type: &str,
        information: &Map<String, Json>,
        now: u64,
    );

    fn resolve_status(&self, ticket: u64, now: u64) -> TicketStatus;

    /// Rejects a ticket; later status queries report [TicketStatus::Denied].
    fn deny(&mut self, ticket: u64);
}

/// Accepts every request once it has been pending for a fixed window,
/// unless it was denied.
#[derive(Debug, Clone, Default)]
pub struct TimedBackend {
    pending_window_secs: u64,
    submitted: HashMap<u64, u64>,
    denied: HashSet<u64>,
}

impl TimedBackend {
    pub fn new(pending_window_secs: u64) -> Self {
        Self {
            pending_window_secs,
            ..Default::default()
        }
    }
}

impl IssuerBackend for TimedBackend {
    fn create_ticket(
        &mut self,
        ticket: u64,
        _credential_type: &str,
        _information: &Map<String, Json>,
        now: u64,
    ) {
        self.submitted.insert(ticket, now);
    }

    fn resolve_status(&self, ticket: u64, now: u64) -> TicketStatus {
        if self.denied.contains(&ticket) {
            return TicketStatus::Denied;
        }
        match self.submitted.get(&ticket) {
            Some(submitted) if now.saturating_sub(*submitted) < self.pending_window_secs => {
                TicketStatus::Pending
            }
            Some(_) => TicketStatus::Accepted,
            None => TicketStatus::Denied,
        }
    }

    fn deny(&mut self, ticket: u64) {
        self.denied.insert(ticket);
    }
}

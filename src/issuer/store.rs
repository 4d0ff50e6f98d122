use std::collections::{BTreeMap, HashMap};

use p256::PublicKey;
use serde_json::{Map, Value as Json};
use tracing::debug;

use super::ProtocolError;

/// One credential request, from submission until its credential is issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub number: u64,
    pub client_id: String,
    pub credential_type: String,
    pub credential_identifier: String,
    pub redirect_uri: String,
    pub information: Map<String, Json>,
    pub submitted_at: u64,
    /// Set when the request was still pending on first status query.
    pub transaction_id: Option<String>,
    /// The key the credential will be bound to, once the holder supplies it.
    pub holder_key: Option<PublicKey>,
}

/// State of one issuer instance: tickets, outstanding authorization codes
/// and live deferred transactions.
///
/// No locking is done here; callers sharing an instance serialize access.
#[derive(Debug, Default)]
pub struct IssuanceStore {
    last_ticket: u64,
    tickets: BTreeMap<u64, Ticket>,
    codes: HashMap<String, u64>,
    credential_identifiers: HashMap<String, u64>,
    transactions: HashMap<String, String>,
}

impl IssuanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a ticket under the next sequence number and pairs it with a
    /// fresh authorization code and credential identifier.
    pub fn create(
        &mut self,
        client_id: &str,
        credential_type: &str,
        redirect_uri: &str,
        information: Map<String, Json>,
        now: u64,
    ) -> Result<(&Ticket, String), ProtocolError> {
        let number = self.last_ticket + 1;
        if self.tickets.contains_key(&number) {
            return Err(ProtocolError::ServerError(format!(
                "ticket {number} already exists"
            )));
        }
        self.last_ticket = number;

        let code = uuid::Uuid::new_v4().to_string();
        let credential_identifier = format!("{credential_type}_{}", uuid::Uuid::new_v4());
        self.codes.insert(code.clone(), number);
        self.credential_identifiers
            .insert(credential_identifier.clone(), number);
        let ticket = self.tickets.entry(number).or_insert(Ticket {
            number,
            client_id: client_id.to_owned(),
            credential_type: credential_type.to_owned(),
            credential_identifier,
            redirect_uri: redirect_uri.to_owned(),
            information,
            submitted_at: now,
            transaction_id: None,
            holder_key: None,
        });
        Ok((&*ticket, code))
    }

    /// Consumes an authorization code issued to `client_id` for `redirect_uri`.
    ///
    /// The code stays valid when the client or redirect URI do not match.
    pub fn redeem_code(
        &mut self,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<&Ticket, ProtocolError> {
        let number = *self
            .codes
            .get(code)
            .ok_or_else(|| ProtocolError::InvalidGrant("authorization code not valid".into()))?;
        let ticket = self
            .tickets
            .get(&number)
            .ok_or_else(|| ProtocolError::ServerError(format!("ticket {number} is missing")))?;
        if ticket.client_id != client_id {
            return Err(ProtocolError::InvalidClient(
                "authorization code does not match client id".into(),
            ));
        }
        if ticket.redirect_uri != redirect_uri {
            return Err(ProtocolError::InvalidRequest(
                "redirect URIs do not match".into(),
            ));
        }
        self.codes.remove(code);
        debug!(ticket = number, "Authorization code redeemed");
        Ok(ticket)
    }

    pub fn ticket(&self, credential_identifier: &str) -> Option<&Ticket> {
        self.credential_identifiers
            .get(credential_identifier)
            .and_then(|number| self.tickets.get(number))
    }

    pub fn ticket_mut(&mut self, credential_identifier: &str) -> Option<&mut Ticket> {
        self.credential_identifiers
            .get(credential_identifier)
            .and_then(|number| self.tickets.get_mut(number))
    }

    /// The transaction id of a pending request, minted on first call.
    pub fn transaction_for(&mut self, credential_identifier: &str) -> Option<String> {
        let ticket = self.ticket_mut(credential_identifier)?;
        if let Some(transaction_id) = &ticket.transaction_id {
            return Some(transaction_id.clone());
        }
        let transaction_id = uuid::Uuid::new_v4().to_string();
        ticket.transaction_id = Some(transaction_id.clone());
        debug!(ticket = ticket.number, "Deferred transaction opened");
        self.transactions
            .insert(transaction_id.clone(), credential_identifier.to_owned());
        Some(transaction_id)
    }

    /// The credential identifier a live transaction polls for.
    pub fn transaction(&self, transaction_id: &str) -> Option<&str> {
        self.transactions.get(transaction_id).map(String::as_str)
    }

    /// Unmaps the transaction of a resolved request, if it has one.
    pub fn release_transaction(&mut self, credential_identifier: &str) {
        let transaction_id = self
            .ticket(credential_identifier)
            .and_then(|ticket| ticket.transaction_id.clone());
        if let Some(transaction_id) = transaction_id {
            if self.transactions.remove(&transaction_id).is_some() {
                debug!(credential_identifier, "Deferred transaction released");
            }
        }
    }
}

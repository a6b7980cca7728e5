use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

use crate::model::ticket::Ticket;


#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OwnedChange {
    Applied,
    NotFound,
    NotOwner,
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// The shared ticket collection. It is internally synchronized so that dispatch workers can
///  execute commands in parallel without any locking on their side.
#[derive(Debug)]
pub struct TicketCollection {
    tickets: DashMap<i32, Ticket>,
    next_id: AtomicI32,
    initialized_at: u64,
    last_modified_at: AtomicU64,
}

impl Default for TicketCollection {
    fn default() -> Self {
        Self::from_tickets(Vec::new())
    }
}

impl TicketCollection {
    pub fn from_tickets(tickets: Vec<Ticket>) -> TicketCollection {
        let next_id = tickets.iter()
            .map(|t| t.id)
            .max()
            .unwrap_or(0) + 1;
        let now = now_millis();

        TicketCollection {
            tickets: tickets.into_iter()
                .map(|t| (t.id, t))
                .collect(),
            next_id: AtomicI32::new(next_id),
            initialized_at: now,
            last_modified_at: AtomicU64::new(now),
        }
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    pub fn initialized_at(&self) -> u64 {
        self.initialized_at
    }

    pub fn last_modified_at(&self) -> u64 {
        self.last_modified_at.load(Ordering::Acquire)
    }

    /// all tickets, ordered by id
    pub fn snapshot(&self) -> Vec<Ticket> {
        let mut result = self.tickets.iter()
            .map(|e| e.value().clone())
            .collect::<Vec<_>>();
        result.sort_by_key(|t| t.id);
        result
    }

    /// Adds a ticket, assigning a fresh id and the creation date. Returns the new id.
    pub fn add(&self, mut ticket: Ticket, owner: &str) -> i32 {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        ticket.id = id;
        ticket.creation_date = now_millis();
        ticket.owner = Some(owner.to_string());

        self.tickets.insert(id, ticket);
        self.touch();
        id
    }

    pub fn remove_owned(&self, id: i32, owner: &str) -> OwnedChange {
        let removed = self.tickets.remove_if(&id, |_, t| t.owner.as_deref() == Some(owner));
        if removed.is_some() {
            self.touch();
            return OwnedChange::Applied;
        }
        if self.tickets.contains_key(&id) {
            OwnedChange::NotOwner
        }
        else {
            OwnedChange::NotFound
        }
    }

    /// Replaces a ticket's data, keeping its id, creation date and owner.
    pub fn update_owned(&self, id: i32, mut ticket: Ticket, owner: &str) -> OwnedChange {
        let Some(mut existing) = self.tickets.get_mut(&id) else {
            return OwnedChange::NotFound;
        };
        if existing.owner.as_deref() != Some(owner) {
            return OwnedChange::NotOwner;
        }

        ticket.id = id;
        ticket.creation_date = existing.creation_date;
        ticket.owner = existing.owner.take();
        *existing = ticket;
        drop(existing);

        self.touch();
        OwnedChange::Applied
    }

    /// removes all tickets of a given owner, returning the number of removed tickets
    pub fn clear_owned(&self, owner: &str) -> usize {
        let before = self.tickets.len();
        self.tickets.retain(|_, t| t.owner.as_deref() != Some(owner));
        let removed = before.saturating_sub(self.tickets.len());
        if removed > 0 {
            self.touch();
        }
        removed
    }

    fn touch(&self) {
        self.last_modified_at.store(now_millis(), Ordering::Release);
    }
}

//! Expense records and the change events pushed to stream subscribers.

use serde::{Deserialize, Serialize};

/// A single expense (or saving) record.
///
/// Field names on the wire are fixed by existing clients: `userID` and
/// `isSaving` are not camel-cased consistently, so each field is renamed
/// explicitly.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Expense {
    /// Record identifier (assigned by the server on create).
    pub id: String,
    /// Owning user identity.
    #[serde(rename = "userID")]
    pub user_id: String,
    /// Short description.
    pub title: String,
    /// Amount.
    pub price: f32,
    /// Free-form date string supplied by the client.
    pub date: String,
    /// Whether this record is a saving rather than a spend.
    #[serde(rename = "isSaving")]
    pub is_saving: bool,
    /// Client icon key.
    pub icon: String,
}

/// An immutable notification that an expense owned by `owner_id` changed.
///
/// Created by the HTTP handlers at publish time and consumed exactly once by
/// the broadcaster. Only `payload` is sent over the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpenseEvent {
    owner_id: String,
    payload: Expense,
}

impl ExpenseEvent {
    /// Build an event for an explicit owner.
    pub fn new(owner_id: impl Into<String>, payload: Expense) -> Self {
        Self {
            owner_id: owner_id.into(),
            payload,
        }
    }

    /// Routing key: the identity whose connections receive this event.
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// The changed record.
    pub fn payload(&self) -> &Expense {
        &self.payload
    }

    /// Serialize the payload as a push frame.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.payload)
    }
}

impl From<Expense> for ExpenseEvent {
    fn from(expense: Expense) -> Self {
        Self {
            owner_id: expense.user_id.clone(),
            payload: expense,
        }
    }
}

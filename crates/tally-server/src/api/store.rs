//! In-memory expense storage, partitioned by owner.

use std::collections::HashMap;

use parking_lot::RwLock;
use tally_core::Expense;
use uuid::Uuid;

/// Process-local expense table.
#[derive(Default)]
pub struct ExpenseStore {
    expenses: RwLock<HashMap<String, Expense>>,
}

impl ExpenseStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// All expenses of `owner_id`, oldest first.
    pub fn list(&self, owner_id: &str) -> Vec<Expense> {
        let mut items: Vec<Expense> = self
            .expenses
            .read()
            .values()
            .filter(|e| e.user_id == owner_id)
            .cloned()
            .collect();
        // v7 IDs sort by creation time.
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    /// One expense, if it exists and belongs to `owner_id`.
    pub fn get(&self, owner_id: &str, id: &str) -> Option<Expense> {
        self.expenses
            .read()
            .get(id)
            .filter(|e| e.user_id == owner_id)
            .cloned()
    }

    /// Store a new expense under a fresh ID and return it.
    pub fn create(&self, owner_id: &str, mut expense: Expense) -> Expense {
        expense.id = Uuid::now_v7().to_string();
        expense.user_id = owner_id.to_owned();
        let _ = self
            .expenses
            .write()
            .insert(expense.id.clone(), expense.clone());
        expense
    }

    /// Replace an existing expense. Returns the stored value, or `None` if
    /// the ID is unknown or owned by someone else.
    pub fn update(&self, owner_id: &str, id: &str, mut expense: Expense) -> Option<Expense> {
        let mut expenses = self.expenses.write();
        let slot = expenses.get_mut(id).filter(|e| e.user_id == owner_id)?;
        expense.id = id.to_owned();
        expense.user_id = owner_id.to_owned();
        *slot = expense.clone();
        Some(expense)
    }

    /// Delete an expense. Returns `false` if it was not found for this owner.
    pub fn delete(&self, owner_id: &str, id: &str) -> bool {
        let mut expenses = self.expenses.write();
        if expenses.get(id).is_some_and(|e| e.user_id == owner_id) {
            let _ = expenses.remove(id);
            true
        } else {
            false
        }
    }

    /// Total stored expenses across all owners.
    pub fn len(&self) -> usize {
        self.expenses.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.expenses.read().is_empty()
    }
}

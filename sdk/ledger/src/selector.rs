//! Note selection
//!
//! 1. Feasibility: total spendable must cover the request.
//! 2. Single-note fit: the smallest note that covers the request on its own
//!    is used alone (first in input order among equal amounts).
//! 3. Otherwise: largest-first greedy accumulation until covered.

use nocta_note::Note;

use crate::error::LedgerError;
use crate::services::NoteStatus;

/// Anything carrying a spendable amount
pub trait Spendable {
    fn amount(&self) -> u64;
}

impl Spendable for u64 {
    fn amount(&self) -> u64 {
        *self
    }
}

impl Spendable for Note {
    fn amount(&self) -> u64 {
        self.amount
    }
}

/// The decrypted note is authoritative over the service-reported amount
impl Spendable for NoteStatus {
    fn amount(&self) -> u64 {
        self.note.amount
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection<T> {
    /// Selected notes in spending order
    pub notes: Vec<T>,
    pub total: u128,
}

/// Select input notes covering `target`.
///
/// Ties in the multi-note fallback keep input order (stable sort), so the
/// result is a pure function of the input slice.
pub fn select_notes<T: Spendable + Clone>(
    notes: &[T],
    target: u64,
) -> Result<Selection<T>, LedgerError> {
    if target == 0 {
        return Err(LedgerError::ZeroAmount);
    }

    let available: u128 = notes.iter().map(|n| n.amount() as u128).sum();
    if available < target as u128 {
        return Err(LedgerError::InsufficientBalance {
            available,
            required: target,
        });
    }

    // min_by_key keeps the first of equal minima
    let best_fit = notes
        .iter()
        .filter(|n| n.amount() >= target)
        .min_by_key(|n| n.amount());
    if let Some(note) = best_fit {
        return Ok(Selection {
            notes: vec![note.clone()],
            total: note.amount() as u128,
        });
    }

    // Sort by value descending
    let mut sorted: Vec<&T> = notes.iter().collect();
    sorted.sort_by(|a, b| b.amount().cmp(&a.amount()));

    let mut selected = Vec::new();
    let mut total: u128 = 0;
    for note in sorted {
        if total >= target as u128 {
            break;
        }
        total += note.amount() as u128;
        selected.push(note.clone());
    }

    Ok(Selection {
        notes: selected,
        total,
    })
}

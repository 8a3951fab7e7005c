use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::distr::{Alphanumeric, SampleString};

pub mod chunk;

pub mod context;

pub mod item;

pub mod job;

pub mod launcher;

pub mod parameters;

pub mod repository;

pub mod step;

/// Generates a random alphanumeric name for components built without one.
fn build_name() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 8)
}

/// Locks a mutex, recovering the guard if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

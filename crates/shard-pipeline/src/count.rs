//! One-way item-count cell.

use std::cell::RefCell;
use std::fmt;

use shard_core::{ShardError, ShardResult};

type Listener = Box<dyn FnOnce(usize)>;

/// Item count that is either known up front or resolved exactly once.
/// Listeners fire on the unknown→known transition.
#[derive(Default)]
pub struct ItemCount {
    inner: RefCell<CountState>,
}

#[derive(Default)]
struct CountState {
    value: Option<usize>,
    listeners: Vec<Listener>,
}

impl ItemCount {
    pub fn known(count: usize) -> Self {
        Self {
            inner: RefCell::new(CountState {
                value: Some(count),
                listeners: Vec::new(),
            }),
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<usize> {
        self.inner.borrow().value
    }

    pub fn resolve(&self, count: usize) -> ShardResult<()> {
        let listeners = {
            let mut state = self.inner.borrow_mut();
            match state.value {
                Some(existing) if existing == count => return Ok(()),
                Some(existing) => {
                    return Err(ShardError::Range(format!(
                        "item count already resolved to {existing}, cannot change to {count}"
                    )))
                }
                None => {
                    state.value = Some(count);
                    std::mem::take(&mut state.listeners)
                }
            }
        };
        for listener in listeners {
            listener(count);
        }
        Ok(())
    }

    /// Run `listener` once the count is known (immediately if it already is).
    pub fn on_resolved(&self, listener: Listener) {
        let value = self.get();
        match value {
            Some(count) => listener(count),
            None => self.inner.borrow_mut().listeners.push(listener),
        }
    }

    /// Range check for an item index against a known count.
    pub fn check_item(&self, item: usize) -> ShardResult<()> {
        match self.get() {
            Some(count) if item >= count => Err(ShardError::Range(format!(
                "item {item} out of range for {count} items"
            ))),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for ItemCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("ItemCount")
            .field("value", &state.value)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_resolve_fires_listeners_once() {
        let count = ItemCount::unknown();
        let hits = Rc::new(Cell::new(0));
        let seen = hits.clone();
        count.on_resolved(Box::new(move |n| seen.set(seen.get() + n)));

        count.resolve(3).unwrap();
        count.resolve(3).unwrap();
        assert_eq!(hits.get(), 3, "listener must fire exactly once");
        assert_eq!(count.get(), Some(3));
    }

    #[test]
    fn test_resolve_is_one_way() {
        let count = ItemCount::known(2);
        assert!(matches!(count.resolve(5), Err(ShardError::Range(_))));
        assert_eq!(count.get(), Some(2));
    }

    #[test]
    fn test_late_listener_runs_immediately() {
        let count = ItemCount::known(4);
        let hit = Rc::new(Cell::new(None));
        let seen = hit.clone();
        count.on_resolved(Box::new(move |n| seen.set(Some(n))));
        assert_eq!(hit.get(), Some(4));
    }

    #[test]
    fn test_check_item() {
        assert!(ItemCount::unknown().check_item(100).is_ok());
        assert!(ItemCount::known(2).check_item(1).is_ok());
        assert!(ItemCount::known(2).check_item(2).is_err());
    }
}

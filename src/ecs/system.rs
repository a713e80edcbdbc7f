//! Systems and their per-tick driver

use std::fmt;
use std::rc::Rc;

use crate::core::error::Result;
use crate::core::types::Tick;
use crate::ecs::state::SimulationState;

/// Logic run once per tick. Event-driven systems subscribe to the bus when
/// they are built and may leave `update` empty.
pub trait System {
    fn name(&self) -> &str;

    /// Component tags an entity must carry for the per-tick update to visit it
    fn required_components(&self) -> &'static [&'static str] {
        &[]
    }

    fn update(&self, state: &mut SimulationState, tick: Tick) -> Result<()>;
}

/// Runs registered systems sequentially in registration order
#[derive(Default)]
pub struct SystemManager {
    systems: Vec<Rc<dyn System>>,
}

impl fmt::Debug for SystemManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemManager").field("systems", &self.names()).finish()
    }
}

impl SystemManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, system: Rc<dyn System>) {
        tracing::debug!("Registered system {}", system.name());
        self.systems.push(system);
    }

    pub fn names(&self) -> Vec<&str> {
        self.systems.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Update every system; the first error stops the tick and is returned
    pub fn update_all(&self, state: &mut SimulationState, tick: Tick) -> Result<()> {
        for system in &self.systems {
            if let Err(e) = system.update(state, tick) {
                tracing::error!("System {} failed at tick {}: {}", system.name(), tick, e);
                return Err(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ArlaError;
    use std::cell::RefCell;

    struct Recorder {
        name: &'static str,
        log: Rc<RefCell<Vec<String>>>,
        fail: bool,
    }

    impl System for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn update(&self, _state: &mut SimulationState, tick: Tick) -> Result<()> {
            self.log.borrow_mut().push(format!("{}@{}", self.name, tick));
            if self.fail {
                return Err(ArlaError::InvalidAction("broken".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_updates_run_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut manager = SystemManager::new();
        for name in ["b", "a", "c"] {
            manager.register(Rc::new(Recorder {
                name,
                log: Rc::clone(&log),
                fail: false,
            }));
        }
        let mut state = SimulationState::new(0);
        manager.update_all(&mut state, 4).unwrap();
        assert_eq!(*log.borrow(), vec!["b@4", "a@4", "c@4"]);
    }

    #[test]
    fn test_first_error_halts_the_tick() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut manager = SystemManager::new();
        manager.register(Rc::new(Recorder {
            name: "bad",
            log: Rc::clone(&log),
            fail: true,
        }));
        manager.register(Rc::new(Recorder {
            name: "never",
            log: Rc::clone(&log),
            fail: false,
        }));
        let mut state = SimulationState::new(0);
        assert!(manager.update_all(&mut state, 0).is_err());
        assert_eq!(*log.borrow(), vec!["bad@0"]);
    }
}

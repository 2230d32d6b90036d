//! Bindings whose listener sets keep changing.
//!
//! Each run adds and removes listeners on randomly chosen bindings, then
//! writes to every binding. Some of the added listeners remove themselves the
//! first time they fire, so dispatch regularly runs into listeners reshaping
//! the hub mid-fire.
//!
//! This scenario tests:
//! - Transitions between the inline and the shared-list storage
//! - Copy-on-write while a fire is in progress
//! - Fan-out cost for a realistic spread of listener counts

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use uibridge::{ChangeListener, InvalidationListener, ValueBinding};

use crate::scenarios::Scenario;

pub struct ChurnConfig {
    pub binding_count: usize,
    /// Listeners each binding starts with.
    pub initial_listeners: usize,
    /// Add or remove operations per run.
    pub churn_per_run: usize,
    /// Share of additions that remove themselves on their first fire.
    pub one_shot_ratio: f64,
    pub seed: u64,
}

impl Default for ChurnConfig {
    fn default() -> Self {
        Self {
            binding_count: 1_000,
            initial_listeners: 2,
            churn_per_run: 500,
            one_shot_ratio: 0.1,
            seed: 12345,
        }
    }
}

enum Registered {
    Invalidation(InvalidationListener),
    Change(ChangeListener<u64>),
}

pub struct ListenerChurnScenario {
    config: ChurnConfig,
    rng: ChaCha8Rng,
    bindings: Vec<Rc<ValueBinding<u64>>>,
    registered: Vec<Vec<Registered>>,
    notifications: Rc<Cell<u64>>,
}

impl ListenerChurnScenario {
    pub fn new() -> Self {
        Self::with_config(ChurnConfig::default())
    }

    pub fn with_config(config: ChurnConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            bindings: Vec::new(),
            registered: Vec::new(),
            notifications: Rc::new(Cell::new(0)),
        }
    }

    /// Listener callbacks delivered so far.
    pub fn notifications(&self) -> u64 {
        self.notifications.get()
    }

    /// Listeners currently registered across all bindings.
    pub fn listener_count(&self) -> usize {
        self.bindings.iter().map(|b| b.hub().len()).sum()
    }

    fn add_listener(&mut self, index: usize) {
        let counter = Rc::clone(&self.notifications);
        if self.rng.gen_bool(self.config.one_shot_ratio) {
            self.add_one_shot(index);
        } else if self.rng.gen_bool(0.5) {
            let listener: InvalidationListener = Rc::new(move || counter.set(counter.get() + 1));
            self.bindings[index].add_invalidation_listener(Rc::clone(&listener));
            self.registered[index].push(Registered::Invalidation(listener));
        } else {
            let listener: ChangeListener<u64> = Rc::new(move |_: &u64, _: &u64| counter.set(counter.get() + 1));
            self.bindings[index].add_change_listener(Rc::clone(&listener));
            self.registered[index].push(Registered::Change(listener));
        }
    }

    /// An invalidation listener that unregisters itself when it first fires.
    fn add_one_shot(&mut self, index: usize) {
        let binding = Rc::downgrade(&self.bindings[index]);
        let counter = Rc::clone(&self.notifications);
        let slot: Rc<RefCell<Option<InvalidationListener>>> = Rc::default();

        let own = Rc::clone(&slot);
        let listener: InvalidationListener = Rc::new(move || {
            counter.set(counter.get() + 1);
            // Taking the slot also breaks the listener's reference to itself.
            let me = own.borrow_mut().take();
            if let (Some(binding), Some(me)) = (binding.upgrade(), me) {
                binding.remove_invalidation_listener(&me);
            }
        });
        *slot.borrow_mut() = Some(Rc::clone(&listener));
        self.bindings[index].add_invalidation_listener(listener);
    }

    fn remove_listener(&mut self, index: usize) {
        let registered = &mut self.registered[index];
        if registered.is_empty() {
            return;
        }
        let victim = registered.swap_remove(self.rng.gen_range(0..registered.len()));
        match victim {
            Registered::Invalidation(l) => self.bindings[index].remove_invalidation_listener(&l),
            Registered::Change(l) => self.bindings[index].remove_change_listener(&l),
        }
    }

    fn fire_all(&self) {
        for binding in &self.bindings {
            binding.set(binding.get().wrapping_add(1));
        }
    }
}

impl Default for ListenerChurnScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario for ListenerChurnScenario {
    fn name(&self) -> &'static str {
        "listener_churn"
    }

    fn description(&self) -> &'static str {
        "Random listener add/remove across many bindings, then one write per binding"
    }

    fn operation_count(&self) -> usize {
        self.config.churn_per_run + self.config.binding_count
    }

    fn setup(&mut self) {
        self.rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        self.notifications.set(0);
        self.bindings = (0..self.config.binding_count)
            .map(|_| Rc::new(ValueBinding::new(0)))
            .collect();
        self.registered = (0..self.config.binding_count).map(|_| Vec::new()).collect();

        for index in 0..self.config.binding_count {
            for _ in 0..self.config.initial_listeners {
                self.add_listener(index);
            }
        }
    }

    fn run(&mut self) {
        if self.bindings.is_empty() {
            return;
        }
        for _ in 0..self.config.churn_per_run {
            let index = self.rng.gen_range(0..self.bindings.len());
            if self.rng.gen_bool(0.5) {
                self.add_listener(index);
            } else {
                self.remove_listener(index);
            }
        }
        self.fire_all();
    }

    fn teardown(&mut self) {
        // Fire once more so pending one-shot listeners release themselves.
        self.fire_all();
        self.registered.clear();
        self.bindings.clear();
    }
}

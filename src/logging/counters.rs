//! Performance counter publishing
//!
//! The application logger periodically copies its error and warning totals into
//! performance-counter slots addressed by (category, counter, instance). The
//! slot storage is abstracted behind [`PerformanceCounters`].

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;

use crate::config::CounterGroups;

pub const ERROR_COUNT: &str = "ErrorCount";
pub const WARNING_COUNT: &str = "WarningCount";
pub const ERRORS_PER_MINUTE_COUNT: &str = "ErrorsPerMinuteCount";
pub const WARNINGS_PER_MINUTE_COUNT: &str = "WarningsPerMinuteCount";
pub const ERROR_COUNT_DELTA: &str = "ErrorCountDelta";
pub const WARNING_COUNT_DELTA: &str = "WarningCountDelta";

/// Updater ticks between per-minute samples
pub const TICKS_PER_MINUTE: u32 = 60;

/// Name and description of one counter slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterDefinition {
    pub name: &'static str,
    pub help: &'static str,
}

const STANDARD: [CounterDefinition; 2] = [
    CounterDefinition {
        name: ERROR_COUNT,
        help: "Total number of errors since the application started.",
    },
    CounterDefinition {
        name: WARNING_COUNT,
        help: "Total number of warnings since the application started.",
    },
];

const PER_MINUTE: [CounterDefinition; 2] = [
    CounterDefinition {
        name: ERRORS_PER_MINUTE_COUNT,
        help: "Number of errors per minute.",
    },
    CounterDefinition {
        name: WARNINGS_PER_MINUTE_COUNT,
        help: "Number of warnings per minute.",
    },
];

const DELTA: [CounterDefinition; 2] = [
    CounterDefinition {
        name: ERROR_COUNT_DELTA,
        help: "Change in the number of errors between the two most recent samples.",
    },
    CounterDefinition {
        name: WARNING_COUNT_DELTA,
        help: "Change in the number of warnings between the two most recent samples.",
    },
];

/// Counters maintained for the enabled groups, in registration order
pub fn counter_definitions(groups: CounterGroups) -> Vec<CounterDefinition> {
    let mut definitions = Vec::with_capacity(6);
    if groups.standard {
        definitions.extend(STANDARD);
    }
    if groups.per_minute {
        definitions.extend(PER_MINUTE);
    }
    if groups.delta {
        definitions.extend(DELTA);
    }
    definitions
}

/// Storage for performance-counter values
pub trait PerformanceCounters: Send + Sync {
    /// Overwrite the raw value of one slot
    fn set(&self, category: &str, counter: &str, instance: &str, value: u64) -> Result<()>;
}

/// Discards every value
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCounters;

impl PerformanceCounters for NoopCounters {
    fn set(&self, _category: &str, _counter: &str, _instance: &str, _value: u64) -> Result<()> {
        Ok(())
    }
}

type SlotKey = (String, String, String);

/// Process-local counter slots, readable for diagnostics and tests
#[derive(Debug, Default)]
pub struct InMemoryCounters {
    values: RwLock<BTreeMap<SlotKey, u64>>,
}

impl InMemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a slot, if it was ever set
    pub fn get(&self, category: &str, counter: &str, instance: &str) -> Option<u64> {
        let key = (category.to_string(), counter.to_string(), instance.to_string());
        self.values
            .read()
            .ok()
            .and_then(|values| values.get(&key).copied())
    }

    /// All slots as `(category, counter, instance) -> value`
    pub fn snapshot(&self) -> BTreeMap<SlotKey, u64> {
        self.values.read().map(|v| v.clone()).unwrap_or_default()
    }
}

impl PerformanceCounters for InMemoryCounters {
    fn set(&self, category: &str, counter: &str, instance: &str, value: u64) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(
            (category.to_string(), counter.to_string(), instance.to_string()),
            value,
        );
        Ok(())
    }
}

/// Converts error/warning totals into counter values, one call per tick
pub struct CounterUpdater {
    category: String,
    instance: String,
    groups: CounterGroups,
    counters: Arc<dyn PerformanceCounters>,
    ticks: u32,
    /// Totals at the last per-minute sample
    minute_base: (u64, u64),
    /// Totals at the previous tick
    tick_base: (u64, u64),
}

impl std::fmt::Debug for CounterUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterUpdater")
            .field("category", &self.category)
            .field("instance", &self.instance)
            .field("groups", &self.groups)
            .field("ticks", &self.ticks)
            .finish()
    }
}

impl CounterUpdater {
    pub fn new(
        category: impl Into<String>,
        instance: impl Into<String>,
        groups: CounterGroups,
        counters: Arc<dyn PerformanceCounters>,
    ) -> Self {
        Self {
            category: category.into(),
            instance: instance.into(),
            groups,
            counters,
            ticks: 0,
            minute_base: (0, 0),
            tick_base: (0, 0),
        }
    }

    /// Reset every enabled slot to zero
    pub fn initialize(&self) -> Result<()> {
        for definition in counter_definitions(self.groups) {
            self.set(definition.name, 0)?;
        }
        Ok(())
    }

    fn set(&self, counter: &str, value: u64) -> Result<()> {
        self.counters
            .set(&self.category, counter, &self.instance, value)
    }

    /// Publish the current totals
    pub fn update(&mut self, errors: u64, warnings: u64) -> Result<()> {
        if self.groups.standard {
            self.set(ERROR_COUNT, errors)?;
            self.set(WARNING_COUNT, warnings)?;
        }

        if self.groups.per_minute {
            self.ticks += 1;
            if self.ticks >= TICKS_PER_MINUTE {
                let (base_errors, base_warnings) = self.minute_base;
                self.set(ERRORS_PER_MINUTE_COUNT, errors.saturating_sub(base_errors))?;
                self.set(WARNINGS_PER_MINUTE_COUNT, warnings.saturating_sub(base_warnings))?;
                self.minute_base = (errors, warnings);
                self.ticks = 0;
            }
        }

        if self.groups.delta {
            let (base_errors, base_warnings) = self.tick_base;
            self.set(ERROR_COUNT_DELTA, errors.saturating_sub(base_errors))?;
            self.set(WARNING_COUNT_DELTA, warnings.saturating_sub(base_warnings))?;
        }
        self.tick_base = (errors, warnings);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn updater(groups: CounterGroups) -> (CounterUpdater, Arc<InMemoryCounters>) {
        let counters = Arc::new(InMemoryCounters::new());
        let updater = CounterUpdater::new("Billing", "node-1", groups, counters.clone());
        (updater, counters)
    }

    fn value(counters: &InMemoryCounters, name: &str) -> Option<u64> {
        counters.get("Billing", name, "node-1")
    }

    #[test]
    fn test_definitions_follow_groups() {
        let all = counter_definitions(CounterGroups::default());
        let names: Vec<_> = all.iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            [
                ERROR_COUNT,
                WARNING_COUNT,
                ERRORS_PER_MINUTE_COUNT,
                WARNINGS_PER_MINUTE_COUNT,
                ERROR_COUNT_DELTA,
                WARNING_COUNT_DELTA
            ]
        );

        let only_delta = CounterGroups {
            standard: false,
            per_minute: false,
            delta: true,
        };
        assert_eq!(counter_definitions(only_delta), DELTA.to_vec());
    }

    #[test]
    fn test_initialize_zeroes_enabled_slots() {
        let (updater, counters) = updater(CounterGroups {
            standard: true,
            per_minute: false,
            delta: false,
        });
        updater.initialize().unwrap();
        assert_eq!(value(&counters, ERROR_COUNT), Some(0));
        assert_eq!(value(&counters, WARNING_COUNT), Some(0));
        assert_eq!(value(&counters, ERRORS_PER_MINUTE_COUNT), None);
        assert_eq!(counters.snapshot().len(), 2);
    }

    #[test]
    fn test_standard_counters_copy_totals() {
        let (mut updater, counters) = updater(CounterGroups::default());
        updater.update(3, 7).unwrap();
        assert_eq!(value(&counters, ERROR_COUNT), Some(3));
        assert_eq!(value(&counters, WARNING_COUNT), Some(7));
    }

    #[test]
    fn test_delta_counters_use_previous_tick() {
        let (mut updater, counters) = updater(CounterGroups::default());
        updater.update(3, 1).unwrap();
        assert_eq!(value(&counters, ERROR_COUNT_DELTA), Some(3));
        updater.update(5, 1).unwrap();
        assert_eq!(value(&counters, ERROR_COUNT_DELTA), Some(2));
        assert_eq!(value(&counters, WARNING_COUNT_DELTA), Some(0));
    }

    #[test]
    fn test_per_minute_counters_every_sixty_ticks() {
        let (mut updater, counters) = updater(CounterGroups::default());
        updater.initialize().unwrap();

        for tick in 1..TICKS_PER_MINUTE {
            updater.update(u64::from(tick), 0).unwrap();
            assert_eq!(value(&counters, ERRORS_PER_MINUTE_COUNT), Some(0));
        }
        updater.update(60, 4).unwrap();
        assert_eq!(value(&counters, ERRORS_PER_MINUTE_COUNT), Some(60));
        assert_eq!(value(&counters, WARNINGS_PER_MINUTE_COUNT), Some(4));

        for _ in 0..TICKS_PER_MINUTE {
            updater.update(75, 4).unwrap();
        }
        assert_eq!(value(&counters, ERRORS_PER_MINUTE_COUNT), Some(15));
        assert_eq!(value(&counters, WARNINGS_PER_MINUTE_COUNT), Some(0));
    }

    #[test]
    fn test_sink_failure_is_returned() {
        struct Refusing;

        impl PerformanceCounters for Refusing {
            fn set(&self, category: &str, _: &str, _: &str, _: u64) -> Result<()> {
                anyhow::bail!("category '{}' does not exist", category)
            }
        }

        let mut updater = CounterUpdater::new("Missing", "x", CounterGroups::default(), Arc::new(Refusing));
        let err = updater.update(1, 1).unwrap_err();
        assert_eq!(err.to_string(), "category 'Missing' does not exist");
    }
}

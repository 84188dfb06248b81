//! Event fan-out to registered observers.
//!
//! A session produces two kinds of events: the device identity (once per
//! session) and energy samples (every report). Each has its own ordered
//! list of observers, invoked synchronously in registration order.
//!
//! Observers run on the session task and must return quickly. A panicking
//! observer is logged and skipped; the remaining observers still run and
//! the session carries on.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::error;

use emerald_types::DeviceIdentity;

/// Callback invoked with the device identity.
pub type IdentityObserver = Box<dyn Fn(&DeviceIdentity) + Send + Sync>;

/// Callback invoked with each energy sample, in Wh.
pub type MeasurementObserver = Box<dyn Fn(f64) + Send + Sync>;

/// Two ordered observer lists.
#[derive(Default)]
pub struct ObserverRegistry {
    identity: Vec<IdentityObserver>,
    measurement: Vec<MeasurementObserver>,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("identity", &self.identity.len())
            .field("measurement", &self.measurement.len())
            .finish()
    }
}

impl ObserverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity observer.
    pub fn on_identity<F>(&mut self, observer: F)
    where
        F: Fn(&DeviceIdentity) + Send + Sync + 'static,
    {
        self.identity.push(Box::new(observer));
    }

    /// Add a measurement observer.
    pub fn on_measurement<F>(&mut self, observer: F)
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.measurement.push(Box::new(observer));
    }

    /// Number of identity observers.
    pub fn identity_count(&self) -> usize {
        self.identity.len()
    }

    /// Number of measurement observers.
    pub fn measurement_count(&self) -> usize {
        self.measurement.len()
    }

    /// Invoke every identity observer. Returns how many panicked.
    pub fn notify_identity(&self, identity: &DeviceIdentity) -> usize {
        self.identity
            .iter()
            .enumerate()
            .filter(|(index, observer)| {
                isolate("identity", *index, || observer(identity)).is_err()
            })
            .count()
    }

    /// Invoke every measurement observer. Returns how many panicked.
    pub fn notify_measurement(&self, energy_wh: f64) -> usize {
        self.measurement
            .iter()
            .enumerate()
            .filter(|(index, observer)| {
                isolate("measurement", *index, || observer(energy_wh)).is_err()
            })
            .count()
    }
}

fn isolate(kind: &str, index: usize, call: impl FnOnce()) -> Result<(), ()> {
    catch_unwind(AssertUnwindSafe(call)).map_err(|payload| {
        error!(
            observer = kind,
            index,
            panic = panic_message(payload.as_ref()),
            "Observer panicked"
        );
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new("AA:BB:CC:DD:EE:FF", "Emerald", "SN1", "1.0")
    }

    #[test]
    fn test_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ObserverRegistry::new();

        for tag in ["first", "second", "third"] {
            let calls = Arc::clone(&calls);
            registry.on_measurement(move |wh| calls.lock().unwrap().push((tag, wh)));
        }

        assert_eq!(registry.notify_measurement(2.5), 0);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![("first", 2.5), ("second", 2.5), ("third", 2.5)]
        );
    }

    #[test]
    fn test_identity_observers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ObserverRegistry::new();
        {
            let seen = Arc::clone(&seen);
            registry.on_identity(move |id| seen.lock().unwrap().push(id.serial.clone()));
        }

        registry.notify_identity(&identity());
        assert_eq!(*seen.lock().unwrap(), vec!["SN1".to_string()]);
        assert_eq!(registry.identity_count(), 1);
        assert_eq!(registry.measurement_count(), 0);
    }

    #[test]
    fn test_panicking_observer_is_isolated() {
        let calls = Arc::new(Mutex::new(0));
        let mut registry = ObserverRegistry::new();

        registry.on_measurement(|_| panic!("observer bug"));
        {
            let calls = Arc::clone(&calls);
            registry.on_measurement(move |_| *calls.lock().unwrap() += 1);
        }
        registry.on_measurement(|_| panic!("{}", String::from("formatted bug")));

        assert_eq!(registry.notify_measurement(1.0), 2);
        assert_eq!(registry.notify_measurement(1.0), 2);
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[test]
    fn test_panicking_identity_observer_is_isolated() {
        let called = Arc::new(Mutex::new(false));
        let mut registry = ObserverRegistry::new();
        registry.on_identity(|_| panic!("boom"));
        {
            let called = Arc::clone(&called);
            registry.on_identity(move |_| *called.lock().unwrap() = true);
        }

        assert_eq!(registry.notify_identity(&identity()), 1);
        assert!(*called.lock().unwrap());
    }

    #[test]
    fn test_empty_registry() {
        let registry = ObserverRegistry::new();
        assert_eq!(registry.notify_identity(&identity()), 0);
        assert_eq!(registry.notify_measurement(0.0), 0);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}

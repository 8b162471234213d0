mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::PASS_TYPE;
use passforge_core::{
    Deadline, DeviceRegistration, MemoryRegistry, PassCredentials, PassRegistry,
    RegistrationOutcome, RegistryError, SqliteRegistry,
};

fn backends() -> Vec<(&'static str, Arc<dyn PassRegistry>)> {
    vec![
        ("memory", Arc::new(MemoryRegistry::new())),
        ("sqlite", Arc::new(SqliteRegistry::in_memory().unwrap())),
    ]
}

fn registration(device: &str, push: &str, serial: &str) -> DeviceRegistration {
    DeviceRegistration {
        device_id: device.into(),
        push_token: push.into(),
        serial_number: serial.into(),
        type_identifier: PASS_TYPE.into(),
    }
}

#[test]
fn register_update_unregister_scenario() {
    for (name, registry) in backends() {
        let d = Deadline::none();
        let creds = PassCredentials::new("S1", "T1", PASS_TYPE);

        let pass = registry.insert_pass(d, creds).unwrap();

        let first = registry.register(d, &registration("D1", "P1", "S1")).unwrap();
        assert_eq!(first, RegistrationOutcome::Created, "{}", name);
        let again = registry.register(d, &registration("D1", "P1", "S1")).unwrap();
        assert_eq!(again, RegistrationOutcome::AlreadyRegistered, "{}", name);
        assert_eq!(registry.push_tokens(d, "S1").unwrap(), vec!["P1"], "{}", name);

        registry.update_pass(d, "S1").unwrap();
        let latest = registry.latest_timestamp(d, creds).unwrap();
        assert!(latest > pass.updated_at, "{}", name);

        assert!(registry.unregister(d, "D1", "S1", PASS_TYPE).unwrap());
        let serials = registry.find_serials(d, "D1", PASS_TYPE, "").unwrap();
        assert!(serials.serial_numbers.is_empty(), "{}", name);
        assert!(serials.last_updated.is_none());
    }
}

#[test]
fn wrong_token_and_wrong_serial_look_the_same() {
    for (name, registry) in backends() {
        let d = Deadline::none();
        registry
            .insert_pass(d, PassCredentials::new("S1", "T1", PASS_TYPE))
            .unwrap();

        let wrong_token = registry
            .latest_timestamp(d, PassCredentials::new("S1", "nope", PASS_TYPE))
            .unwrap_err();
        let wrong_serial = registry
            .latest_timestamp(d, PassCredentials::new("S9", "T1", PASS_TYPE))
            .unwrap_err();
        assert_eq!(wrong_token.to_string(), wrong_serial.to_string(), "{}", name);
        assert!(matches!(wrong_token, RegistryError::NotFound(_)));
        assert!(!wrong_token.is_retryable());
    }
}

/// Racing register/unregister on one pair must match one of the two serial
/// orders: if unregister removed a row, register ran first and the pair is
/// gone; otherwise unregister ran first and the pair remains.
#[test]
fn register_and_unregister_linearize() {
    for (name, registry) in backends() {
        let d = Deadline::none();
        registry
            .insert_pass(d, PassCredentials::new("S1", "T1", PASS_TYPE))
            .unwrap();

        for round in 0..200 {
            let device = format!("D{}", round);
            let reg = Arc::clone(&registry);
            let dev = device.clone();
            let registering = thread::spawn(move || {
                reg.register(Deadline::none(), &registration(&dev, "P", "S1"))
                    .unwrap()
            });
            let unreg = Arc::clone(&registry);
            let dev = device.clone();
            let unregistering = thread::spawn(move || {
                unreg
                    .unregister(Deadline::none(), &dev, "S1", PASS_TYPE)
                    .unwrap()
            });

            assert_eq!(registering.join().unwrap(), RegistrationOutcome::Created);
            let removed = unregistering.join().unwrap();

            let present = registry
                .find_serials(d, &device, PASS_TYPE, "")
                .unwrap()
                .serial_numbers
                == vec!["S1".to_string()];
            assert_eq!(present, !removed, "{} round {}", name, round);
        }
    }
}

#[test]
fn concurrent_updates_stay_strictly_monotonic() {
    for (name, registry) in backends() {
        let d = Deadline::none();
        registry
            .insert_pass(d, PassCredentials::new("S1", "T1", PASS_TYPE))
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    (0..25)
                        .map(|_| registry.update_pass(Deadline::none(), "S1").unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            let stamps = handle.join().unwrap();
            assert!(stamps.windows(2).all(|w| w[0] < w[1]), "{}", name);
            all.extend(stamps);
        }
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total, "{}: duplicate timestamps", name);

        let latest = registry
            .latest_timestamp(d, PassCredentials::new("S1", "T1", PASS_TYPE))
            .unwrap();
        assert_eq!(Some(&latest), all.last());
    }
}

#[test]
fn registrations_are_scoped_by_device_and_type() {
    for (name, registry) in backends() {
        let d = Deadline::none();
        registry
            .insert_pass(d, PassCredentials::new("S1", "T1", PASS_TYPE))
            .unwrap();
        registry
            .insert_pass(d, PassCredentials::new("C1", "T2", "com.example.coupon"))
            .unwrap();
        registry.register(d, &registration("D1", "P1", "S1")).unwrap();
        registry
            .register(
                d,
                &DeviceRegistration {
                    device_id: "D1".into(),
                    push_token: "P1".into(),
                    serial_number: "C1".into(),
                    type_identifier: "com.example.coupon".into(),
                },
            )
            .unwrap();

        let tickets = registry.find_serials(d, "D1", PASS_TYPE, "").unwrap();
        assert_eq!(tickets.serial_numbers, vec!["S1"], "{}", name);
        let coupons = registry
            .find_serials(d, "D1", "com.example.coupon", "")
            .unwrap();
        assert_eq!(coupons.serial_numbers, vec!["C1"], "{}", name);
        assert!(registry
            .find_serials(d, "D2", PASS_TYPE, "")
            .unwrap()
            .is_empty());
    }
}

#[test]
fn expired_deadline_is_retryable_and_changes_nothing() {
    for (name, registry) in backends() {
        let d = Deadline::none();
        registry
            .insert_pass(d, PassCredentials::new("S1", "T1", PASS_TYPE))
            .unwrap();
        let before = registry.get_pass(d, "S1").unwrap().unwrap();

        let expired = Deadline::after(Duration::ZERO);
        thread::sleep(Duration::from_millis(1));
        let err = registry.update_pass(expired, "S1").unwrap_err();
        assert!(err.is_retryable(), "{}", name);
        assert_eq!(registry.get_pass(d, "S1").unwrap().unwrap(), before);
    }
}

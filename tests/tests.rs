// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use std::sync::Arc;
use std::thread;

use serde_json::json;
use usdt_dynamic::*;

fn setup(name: &str, module: Option<&str>) -> (Arc<ProcessTracer>, Provider) {
    let _ = env_logger::builder().is_test(true).try_init();
    let tracer = Arc::new(ProcessTracer::new());
    let provider = Provider::create_on(tracer.clone(), name, module).unwrap();
    return (tracer, provider);
}

fn all_probes(provider: &Provider) -> String {
    return format!("{}:::", provider.scoped_name());
}

#[test]
fn create_provider() {
    let (_tracer, provider) = setup("foo", Some("bar"));
    assert_eq!(provider.name(), "foo");
    assert_eq!(provider.module(), "bar");
    assert_eq!(
        provider.scoped_name(),
        format!("foo{}", std::process::id())
    );
    assert_eq!(provider.state(), ProviderState::Registered);
}

#[test]
fn create_provider_module_defaults_to_name() {
    let (_tracer, provider) = setup("foo", None);
    assert_eq!(provider.module(), "foo");

    let (_tracer, provider) = setup("foo", Some(""));
    assert_eq!(provider.module(), "foo");
}

#[test]
fn create_provider_requires_a_name() {
    let tracer = Arc::new(ProcessTracer::new());
    assert!(matches!(
        Provider::create_on(tracer, "", None),
        Err(UsdtError::MissingName)
    ));
}

#[test]
fn create_provider_on_the_process_tracer() {
    let mut provider = Provider::create("usdtglobal").unwrap();
    let _probe = provider.probe(None, "usdtprobe", &[]).unwrap();
    provider.enable().unwrap();
    assert_eq!(
        ProcessTracer::global().probe_count(&all_probes(&provider)),
        1
    );
    provider.close();
    assert_eq!(
        ProcessTracer::global().probe_count(&all_probes(&provider)),
        0
    );
}

#[test]
fn attach_probe_requires_a_name() {
    let (_tracer, mut provider) = setup("foo", Some("bar"));
    assert!(matches!(
        provider.probe(None, "", &[]),
        Err(UsdtError::MissingName)
    ));
}

#[test]
fn attach_probe_rejects_unknown_type_tags() {
    let (_tracer, mut provider) = setup("foo", Some("bar"));
    for tag in ["Integer", "int", "char *", ""] {
        assert!(matches!(
            provider.probe(None, "usdtprobe", &[tag]),
            Err(UsdtError::InvalidArgumentType(_))
        ));
    }
}

#[test]
fn attach_probe_with_the_maximum_number_of_arguments() {
    let (tracer, mut provider) = setup("foo", None);
    let tags = vec!["integer"; 32];
    let probe = provider.probe(Some("func"), "usdtprobe", &tags).unwrap();
    assert_eq!(probe.argument_types().len(), 32);
    provider.enable().unwrap();
    assert_eq!(tracer.probe_count(&all_probes(&provider)), 1);
}

#[test]
fn attach_probe_rejects_33_arguments() {
    let (_tracer, mut provider) = setup("foo", None);
    let tags = vec!["integer"; 33];
    assert!(matches!(
        provider.probe(Some("func"), "usdtprobe", &tags),
        Err(UsdtError::TooManyArguments(33))
    ));
}

#[test]
fn probe_function_defaults_to_func() {
    let (tracer, mut provider) = setup("foo", None);
    let probe = provider.probe(None, "usdtprobe", &[]).unwrap();
    assert_eq!(probe.function(), "func");
    provider.enable().unwrap();
    assert_eq!(
        tracer.probe_count(&format!("{}::func:", provider.scoped_name())),
        1
    );
}

#[test]
fn fire_a_probe_while_observed() {
    let (tracer, mut provider) = setup("foo", Some("bar"));
    let probe = provider.probe(Some("func"), "usdtprobe", &["string"]).unwrap();
    provider.enable().unwrap();

    let session = tracer.attach(&format!("{}*:::", provider.name()));
    assert!(probe.fire(&[Value::from("foo")]).unwrap());

    let records = session.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(
        record.probe,
        format!("foo{}:bar:func:usdtprobe", std::process::id())
    );
    assert_eq!(record.probe, probe.to_string());
    assert_eq!(record.values, vec![TracedValue::Text("foo".to_string())]);
}

#[test]
fn fire_an_integer_probe_round_trips_the_value() {
    let (tracer, mut provider) = setup("foo", Some("bar"));
    let probe = provider.probe(Some("func"), "usdtprobe", &["integer"]).unwrap();
    provider.enable().unwrap();

    let session = tracer.attach(&all_probes(&provider));
    let values: [i64; 9] = [
        0,
        (1 << 30) - 1,
        -(1 << 30),
        (1 << 31) - 1,
        -(1 << 31),
        (1 << 61) - 1,
        -(1 << 61),
        i64::MAX,
        i64::MIN,
    ];
    for v in values {
        assert!(probe.fire(&[Value::from(v)]).unwrap());
    }

    let captured: Vec<TracedValue> = session
        .records()
        .into_iter()
        .flat_map(|r| r.values)
        .collect();
    let expected: Vec<TracedValue> = values.iter().map(|v| TracedValue::Integer(*v)).collect();
    assert_eq!(captured, expected);
}

#[test]
fn fire_an_out_of_range_integer_fails_while_observed() {
    let (tracer, mut provider) = setup("foo", Some("bar"));
    let probe = provider.probe(Some("func"), "usdtprobe", &["integer"]).unwrap();
    provider.enable().unwrap();

    let _session = tracer.attach(&all_probes(&provider));
    assert!(matches!(
        probe.fire(&[Value::Integer(i64::MAX as i128 + 1)]),
        Err(UsdtError::IntegerOverflow(_))
    ));
    assert!(matches!(
        probe.fire(&[Value::from("not a number")]),
        Err(UsdtError::TypeMismatch { .. })
    ));
}

#[test]
fn fire_json_probes() {
    let (tracer, mut provider) = setup("foo", Some("bar"));
    let probe = provider.probe(Some("func"), "usdtprobe", &["json"]).unwrap();
    provider.enable().unwrap();

    let session = tracer.attach(&all_probes(&provider));
    assert!(probe.fire(&[Value::from(json!({"foo": "bar"}))]).unwrap());
    assert!(probe.fire(&[Value::from(json!([1, 2, 3]))]).unwrap());
    assert!(probe.fire(&[Value::from("foo")]).unwrap());
    assert!(probe.fire(&[Value::from(1i64)]).unwrap());

    let captured: Vec<TracedValue> = session
        .records()
        .into_iter()
        .flat_map(|r| r.values)
        .collect();
    assert_eq!(
        captured,
        vec![
            TracedValue::Text(r#"{"foo":"bar"}"#.to_string()),
            TracedValue::Text("[1,2,3]".to_string()),
            TracedValue::Text(r#""foo""#.to_string()),
            TracedValue::Text("1".to_string()),
        ]
    );
}

#[test]
fn enabled_tracks_the_observation_window() {
    let (tracer, mut provider) = setup("foo", Some("bar"));
    let probe = provider.probe(Some("func"), "usdtprobe", &[]).unwrap();
    provider.enable().unwrap();

    // Enabled provider, but nobody watching.
    assert!(!probe.enabled().unwrap());

    let mut session = tracer.attach(&all_probes(&provider));
    assert!(probe.enabled().unwrap());

    session.detach();
    assert!(!probe.enabled().unwrap());
}

#[test]
fn is_observed_matches_the_probe_fast_path() {
    let (tracer, mut provider) = setup("foo", Some("bar"));
    let probe = provider.probe(Some("func"), "usdtprobe", &[]).unwrap();

    assert!(provider.registration().is_none());
    provider.enable().unwrap();
    let handle = provider.registration().unwrap();
    assert!(!tracer.is_observed(handle, probe.identity()));

    let _session = tracer.attach(&all_probes(&provider));
    assert!(tracer.is_observed(handle, probe.identity()));
    assert!(probe.enabled().unwrap());
}

#[test]
fn fire_unobserved_is_a_cheap_no_op() {
    let (tracer, mut provider) = setup("foo", Some("bar"));
    let probe = provider.probe(Some("func"), "usdtprobe", &["integer"]).unwrap();

    // Not even enabled: no validation of the bogus argument.
    assert!(!probe.fire(&[Value::from("wrong type")]).unwrap());

    provider.enable().unwrap();
    // Enabled but unobserved: still no validation, still false.
    assert!(!probe.fire(&[Value::from("wrong type")]).unwrap());
    assert!(!probe
        .fire(&[Value::Integer(i64::MAX as i128 + 1)])
        .unwrap());
    assert_eq!(tracer.attach(&all_probes(&provider)).records().len(), 0);
}

#[test]
fn fire_arity_mismatch_fails_even_unobserved() {
    let (_tracer, mut provider) = setup("foo", Some("bar"));
    let probe = provider.probe(Some("func"), "usdtprobe", &["integer"]).unwrap();

    assert!(matches!(
        probe.fire(&[]),
        Err(UsdtError::Arity {
            expected: 1,
            actual: 0,
            ..
        })
    ));
    assert!(matches!(
        probe.fire(&[Value::from(1i64), Value::from(2i64)]),
        Err(UsdtError::Arity { .. })
    ));
}

#[test]
fn enable_and_disable_are_idempotent() {
    let (tracer, mut provider) = setup("foo", Some("bar"));
    let _probe = provider.probe(Some("func"), "usdtprobe", &[]).unwrap();

    provider.enable().unwrap();
    provider.enable().unwrap();
    assert_eq!(provider.state(), ProviderState::Enabled);
    assert_eq!(tracer.probe_count(&all_probes(&provider)), 1);

    provider.disable().unwrap();
    provider.disable().unwrap();
    assert_eq!(provider.state(), ProviderState::Registered);
    assert_eq!(tracer.probe_count(&all_probes(&provider)), 0);
}

#[test]
fn close_is_idempotent_and_terminal() {
    let (tracer, mut provider) = setup("foo", Some("bar"));
    let probe = provider.probe(Some("func"), "usdtprobe", &[]).unwrap();
    provider.enable().unwrap();

    provider.close();
    provider.close();
    assert_eq!(provider.state(), ProviderState::Closed);
    assert_eq!(tracer.probe_count(&all_probes(&provider)), 0);

    assert!(matches!(
        provider.probe(None, "another", &[]),
        Err(UsdtError::ClosedProvider(_))
    ));
    assert!(matches!(provider.enable(), Err(UsdtError::ClosedProvider(_))));
    assert!(matches!(provider.disable(), Err(UsdtError::ClosedProvider(_))));
    assert!(matches!(probe.enabled(), Err(UsdtError::ClosedProvider(_))));
    assert!(matches!(
        probe.fire(&[]),
        Err(UsdtError::ClosedProvider(_))
    ));
}

#[test]
fn probe_set_is_frozen_while_enabled() {
    let (_tracer, mut provider) = setup("foo", Some("bar"));
    let probe = provider.probe(Some("func"), "usdtprobe", &[]).unwrap();
    provider.enable().unwrap();

    assert!(matches!(
        provider.probe(Some("func"), "another", &[]),
        Err(UsdtError::ProviderEnabled(_))
    ));
    assert!(matches!(
        provider.remove_probe(&probe),
        Err(UsdtError::ProviderEnabled(_))
    ));

    provider.disable().unwrap();
    provider.remove_probe(&probe).unwrap();
    provider.probe(Some("func"), "another", &[]).unwrap();
}

#[test]
fn remove_probe_rejects_a_foreign_probe() {
    let (_tracer, mut provider) = setup("foo", Some("bar"));
    let (_other_tracer, mut other) = setup("baz", None);
    let foreign = other.probe(Some("func"), "usdtprobe", &[]).unwrap();

    assert!(matches!(
        provider.remove_probe(&foreign),
        Err(UsdtError::InvalidArgument(_))
    ));
}

#[test]
fn remove_probe_then_re_enable() {
    let (tracer, mut provider) = setup("foo", Some("bar"));
    let probe1 = provider.probe(Some("func"), "usdtprobe1", &[]).unwrap();
    let _probe2 = provider.probe(Some("func"), "usdtprobe2", &[]).unwrap();

    provider.enable().unwrap();
    assert_eq!(tracer.probe_count(&all_probes(&provider)), 2);

    provider.disable().unwrap();
    provider.remove_probe(&probe1).unwrap();
    provider.enable().unwrap();
    assert_eq!(tracer.probe_count(&all_probes(&provider)), 1);
    assert_eq!(
        tracer.list_probes(&all_probes(&provider)),
        vec![format!("{}:bar:func:usdtprobe2", provider.scoped_name())]
    );
}

#[test]
fn dropping_the_provider_unregisters_it() {
    let _ = env_logger::builder().is_test(true).try_init();
    let tracer = Arc::new(ProcessTracer::new());
    let pattern;
    {
        let mut provider = Provider::create_on(tracer.clone(), "foo", Some("bar")).unwrap();
        let _probe = provider.probe(Some("func"), "usdtprobe", &[]).unwrap();
        provider.enable().unwrap();
        pattern = all_probes(&provider);
        assert_eq!(tracer.probe_count(&pattern), 1);
    }
    assert_eq!(tracer.probe_count(&pattern), 0);
}

#[test]
fn concurrent_fire_and_enabled_on_a_stable_probe_set() {
    let (tracer, mut provider) = setup("foo", Some("bar"));
    let probe = provider.probe(Some("func"), "usdtprobe", &["integer"]).unwrap();
    provider.enable().unwrap();
    let session = tracer.attach(&all_probes(&provider));

    let threads: Vec<_> = (0..4i64)
        .map(|t| {
            let probe = probe.clone();
            thread::spawn(move || {
                for i in 0..100i64 {
                    if probe.enabled().unwrap() {
                        probe.fire(&[Value::from(t * 1000 + i)]).unwrap();
                    }
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(session.records().len(), 400);
}

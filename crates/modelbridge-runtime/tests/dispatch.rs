mod common;

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use modelbridge_core::ErrorKind;
use modelbridge_runtime::{Bridge, BridgeConfig, TaskState};
use serde_json::json;

use common::{evaluate_now, load_now, ScriptedEngine};

fn config(yaml: &str) -> Result<BridgeConfig> {
    Ok(BridgeConfig::from_yaml_str(yaml)?)
}

#[test]
fn panicking_load_is_delivered_as_internal_error() -> Result<()> {
    let (engine, probe) = ScriptedEngine::new(true, Duration::ZERO);
    let bridge = Bridge::with_defaults(engine)?;

    let err = load_now(&bridge, Path::new("panic.model"))
        .err()
        .context("panicking load succeeded")?;
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(err.to_string().contains("loader crashed"), "{err}");
    assert_eq!(probe.loads.load(std::sync::atomic::Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn engine_failures_during_load_are_load_errors() -> Result<()> {
    let (engine, _probe) = ScriptedEngine::new(true, Duration::ZERO);
    let bridge = Bridge::with_defaults(engine)?;

    let err = load_now(&bridge, Path::new("broken.model"))
        .err()
        .context("broken load succeeded")?;
    assert_eq!(err.kind(), ErrorKind::Load);
    assert!(err.to_string().contains("corrupt header"), "{err}");
    Ok(())
}

#[test]
fn panicking_evaluation_leaves_the_handle_usable() -> Result<()> {
    let (engine, probe) = ScriptedEngine::new(false, Duration::ZERO);
    let bridge = Bridge::with_defaults(engine)?;
    let handle = load_now(&bridge, Path::new("ok.model"))?;
    assert!(handle.is_serialized());

    let err = evaluate_now(bridge.host(), &handle, &json!({"panic": [[1]]}), None)
        .err()
        .context("panicking evaluation succeeded")?;
    assert_eq!(err.kind(), ErrorKind::Internal);

    let err = evaluate_now(bridge.host(), &handle, &json!({"fail": [[1]]}), None)
        .err()
        .context("failing evaluation succeeded")?;
    assert_eq!(err.kind(), ErrorKind::Shape);

    // the evaluation gate survives a panic inside it
    let outputs = evaluate_now(bridge.host(), &handle, &json!([[1, 2]]), None)?;
    assert_eq!(outputs, json!({"out0": [[1.0, 2.0]]}));
    assert_eq!(probe.evaluations(), 3);
    Ok(())
}

#[test]
fn every_task_completes_exactly_once() -> Result<()> {
    let (engine, _probe) = ScriptedEngine::new(true, Duration::from_millis(2));
    let bridge = Bridge::with_defaults(engine)?;
    let handle = load_now(&bridge, Path::new("ok.model"))?;
    let host = bridge.host();
    let before = (host.dispatched_tasks(), host.delivered_tasks());
    let calls: Rc<RefCell<HashMap<usize, usize>>> = Rc::default();

    for i in 0..24 {
        let inputs = match i % 3 {
            0 => json!([[i]]),
            1 => json!({"fail": [[i]]}),
            _ => json!({"panic": [[i]]}),
        };
        let sink = Rc::clone(&calls);
        handle.evaluate(&inputs, None, move |_| {
            *sink.borrow_mut().entry(i).or_default() += 1;
        })?;
    }
    for i in 24..30 {
        let sink = Rc::clone(&calls);
        let path = if i % 2 == 0 { "ok.model" } else { "broken.model" };
        bridge.load_model(path, move |_| {
            *sink.borrow_mut().entry(i).or_default() += 1;
        })?;
    }

    assert_eq!(bridge.run_until_idle()?, 30);
    let calls = calls.borrow();
    assert_eq!(calls.len(), 30);
    assert!(calls.values().all(|&n| n == 1), "{calls:?}");
    assert_eq!(host.dispatched_tasks() - before.0, 30);
    assert_eq!(host.delivered_tasks() - before.1, 30);
    assert_eq!(host.pending_tasks(), 0);
    Ok(())
}

#[test]
fn non_concurrent_engine_never_overlaps_evaluations() -> Result<()> {
    let (engine, probe) = ScriptedEngine::new(false, Duration::from_millis(10));
    let bridge = Bridge::with_defaults(engine)?;
    let handle = load_now(&bridge, Path::new("ok.model"))?;

    for i in 0..6 {
        handle.evaluate(&json!([[i]]), None, |result| {
            assert!(result.is_ok());
        })?;
    }
    assert_eq!(bridge.run_until_idle()?, 6);
    assert_eq!(probe.evaluations(), 6);
    assert_eq!(probe.max_active(), 1);
    Ok(())
}

#[test]
fn configuration_can_force_serialized_evaluation() -> Result<()> {
    let (engine, probe) = ScriptedEngine::new(true, Duration::from_millis(10));
    let config = config("engine:\n  serialize_evaluations: true\n")?;
    let bridge = Bridge::new(engine, &config)?;
    let handle = load_now(&bridge, Path::new("ok.model"))?;
    assert!(handle.is_serialized());

    for i in 0..4 {
        handle.evaluate(&json!([[i]]), None, |_| {})?;
    }
    bridge.run_until_idle()?;
    assert_eq!(probe.max_active(), 1);
    Ok(())
}

#[test]
fn concurrent_engine_handles_are_not_gated() -> Result<()> {
    let (engine, _probe) = ScriptedEngine::new(true, Duration::ZERO);
    let bridge = Bridge::with_defaults(engine)?;
    let handle = load_now(&bridge, Path::new("ok.model"))?;
    assert!(!handle.is_serialized());
    Ok(())
}

#[test]
fn task_state_is_tracked_until_delivery() -> Result<()> {
    let (engine, _probe) = ScriptedEngine::new(true, Duration::from_millis(20));
    let bridge = Bridge::with_defaults(engine)?;
    let handle = load_now(&bridge, Path::new("ok.model"))?;

    let id = handle.evaluate(&json!([[1]]), None, |_| {})?;
    let state = bridge.host().task_state(id).context("task not tracked")?;
    assert!(!matches!(state, TaskState::Failed), "{state:?}");

    // wait for the worker, without delivering
    let mut state = state;
    for _ in 0..200 {
        if state.is_terminal() {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
        state = bridge.host().task_state(id).context("task vanished")?;
    }
    assert_eq!(state, TaskState::Succeeded);

    assert_eq!(bridge.run_until_idle()?, 1);
    assert!(bridge.host().task_state(id).is_none());
    Ok(())
}

#[test]
fn shutdown_delivers_internal_errors_to_tasks_in_flight() -> Result<()> {
    let (engine, _probe) = ScriptedEngine::new(true, Duration::from_millis(200));
    let bridge = Bridge::with_defaults(engine)?;
    let handle = load_now(&bridge, Path::new("ok.model"))?;
    let kinds = Rc::new(RefCell::new(Vec::new()));

    for i in 0..3 {
        let sink = Rc::clone(&kinds);
        handle.evaluate(&json!([[i]]), None, move |result| {
            sink.borrow_mut().push(result.err().map(|e| e.kind()));
        })?;
    }
    bridge.shutdown();

    assert_eq!(
        *kinds.borrow(),
        vec![Some(ErrorKind::Internal); 3],
        "every in-flight task resolves with an error"
    );
    let err = handle
        .evaluate(&json!([[1]]), None, |_| {})
        .err()
        .context("dispatch after shutdown succeeded")?;
    assert_eq!(err.kind(), ErrorKind::Internal);
    Ok(())
}

#[test]
fn dropping_the_bridge_resolves_a_load_in_flight() -> Result<()> {
    let (engine, _probe) = ScriptedEngine::new(true, Duration::ZERO);
    let bridge = Bridge::with_defaults(engine)?;
    let kinds = Rc::new(RefCell::new(Vec::new()));

    let sink = Rc::clone(&kinds);
    bridge.load_model("ok.model", move |result| {
        sink.borrow_mut().push(result.err().map(|e| e.kind()));
    })?;
    drop(bridge);

    assert_eq!(*kinds.borrow(), vec![Some(ErrorKind::Internal)]);
    Ok(())
}

#[test]
fn handles_do_not_keep_a_dropped_bridge_alive() -> Result<()> {
    let (engine, _probe) = ScriptedEngine::new(true, Duration::from_millis(100));
    let bridge = Bridge::with_defaults(engine)?;
    let handle = load_now(&bridge, Path::new("ok.model"))?;
    let kinds = Rc::new(RefCell::new(Vec::new()));

    let sink = Rc::clone(&kinds);
    let inner = handle.clone();
    handle.evaluate(&json!([[1]]), None, move |result| {
        // the loop is already gone when this runs
        let again = inner.evaluate(&json!([[2]]), None, |_| {});
        sink.borrow_mut().push(result.err().map(|e| e.kind()));
        sink.borrow_mut().push(again.err().map(|e| e.kind()));
    })?;
    drop(bridge);

    assert_eq!(
        *kinds.borrow(),
        vec![Some(ErrorKind::Internal), Some(ErrorKind::Internal)]
    );
    let err = handle
        .evaluate(&json!([[3]]), None, |_| {})
        .err()
        .context("dispatch on a dropped bridge succeeded")?;
    assert_eq!(err.kind(), ErrorKind::Internal);
    Ok(())
}

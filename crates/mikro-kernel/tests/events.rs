//! Event fan-out scenarios: snapshot dispatch, isolation, ordering.

use mikro_kernel::testing::{write_bundle, ScriptedLoader};
use mikro_kernel::{CallbackError, EventArgs, Kernel, KernelConfig, PluginApi};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

type Journal = Arc<Mutex<Vec<String>>>;
type ApiSlot = Arc<Mutex<Option<Arc<PluginApi>>>>;

fn fast_config(root: &Path) -> KernelConfig {
    KernelConfig::default()
        .with_plugin_root(root)
        .with_start_timeout(Duration::from_millis(500))
        .with_stop_timeout(Duration::from_millis(500))
        .with_task_grace(Duration::from_millis(500))
}

fn args(pairs: &[(&str, Value)]) -> EventArgs {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Boots a kernel with a single "hub" plugin and hands back its facade.
fn kernel_with_hub(root: &Path, loader: &Arc<ScriptedLoader>) -> (Kernel, Arc<PluginApi>) {
    write_bundle(root, "hub", "1.0", &[]);
    let slot: ApiSlot = Arc::new(Mutex::new(None));
    let capture = Arc::clone(&slot);
    loader.on_start("hub", move |api| {
        *capture.lock() = Some(Arc::clone(api));
        Ok(())
    });
    let kernel = Kernel::new(fast_config(root), Box::new(Arc::clone(loader)));
    let report = kernel.init();
    assert!(report.is_clean(), "hub must come up: {report:?}");
    let api = slot.lock().clone().expect("hub facade");
    (kernel, api)
}

#[test]
fn sync_fanout_reifies_middle_error_and_runs_siblings() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let loader = ScriptedLoader::new();
    let (kernel, api) = kernel_with_hub(tmp.path(), &loader);

    let journal: Journal = Arc::new(Mutex::new(Vec::new()));
    for (idx, behaviour) in ["ok", "err", "ok"].iter().enumerate() {
        let j = Arc::clone(&journal);
        let behaviour = behaviour.to_string();
        api.on(
            "ping",
            Arc::new(move |_| {
                j.lock().push(format!("cb{idx}"));
                if behaviour == "err" {
                    Err("boom".to_string())
                } else {
                    Ok(json!(format!("r{idx}")))
                }
            }),
        )
        .expect("subscribe");
    }

    let results = kernel.call("ping", EventArgs::new(), None);
    assert_eq!(results.len(), 3);
    assert_eq!(results[0], Ok(json!("r0")));
    assert_eq!(results[1], Err(CallbackError::Failed("boom".to_string())));
    assert_eq!(results[2], Ok(json!("r2")));
    assert_eq!(*journal.lock(), vec!["cb0", "cb1", "cb2"]);
    kernel.shutdown();
}

#[test]
fn async_fanout_returns_futures_in_subscription_order() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let loader = ScriptedLoader::new();
    let (kernel, api) = kernel_with_hub(tmp.path(), &loader);

    api.on("sum", Arc::new(|args| {
        let a = args.get("a").and_then(Value::as_i64).unwrap_or(0);
        let b = args.get("b").and_then(Value::as_i64).unwrap_or(0);
        Ok(json!(a + b))
    }))
    .expect("subscribe");
    api.on("sum", Arc::new(|_| Ok(json!("second"))))
        .expect("subscribe");

    let futures = api
        .emit("sum", args(&[("a", json!(2)), ("b", json!(40))]))
        .expect("emit");
    assert_eq!(futures.len(), 2);
    assert!(futures.iter().all(|f| f.owner() == "hub"));

    let mut outcomes = Vec::new();
    for future in futures {
        outcomes.push(future.wait());
    }
    assert_eq!(outcomes[0], Ok(json!(42)));
    assert_eq!(outcomes[1], Ok(json!("second")));
    kernel.shutdown();
}

#[test]
fn panicking_callback_is_isolated_from_siblings_and_pool() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let loader = ScriptedLoader::new();
    let (kernel, api) = kernel_with_hub(tmp.path(), &loader);

    api.on("risky", Arc::new(|_| panic!("callback exploded")))
        .expect("subscribe");
    api.on("risky", Arc::new(|_| Ok(json!("survivor"))))
        .expect("subscribe");

    let futures = api.emit("risky", EventArgs::new()).expect("emit");
    let outcomes: Vec<_> = futures.into_iter().map(|f| f.wait()).collect();
    assert!(matches!(outcomes[0], Err(CallbackError::Panicked(_))));
    assert_eq!(outcomes[1], Ok(json!("survivor")));

    // The pool lost no workers: a fresh emit still dispatches.
    let futures = api.emit("risky", EventArgs::new()).expect("emit");
    let outcomes: Vec<_> = futures.into_iter().map(|f| f.wait()).collect();
    assert_eq!(outcomes[1], Ok(json!("survivor")));
    kernel.shutdown();
}

#[test]
fn snapshot_isolates_inflight_dispatch_from_mutation() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let loader = ScriptedLoader::new();
    let (kernel, api) = kernel_with_hub(tmp.path(), &loader);

    // The first subscriber registers another subscription while the
    // fan-out is in flight; the running batch must not see it.
    let facade = Arc::clone(&api);
    api.on(
        "growing",
        Arc::new(move |_| {
            let _ = facade.on("growing", Arc::new(|_| Ok(json!("late"))));
            Ok(json!("early"))
        }),
    )
    .expect("subscribe");

    let first = kernel.call("growing", EventArgs::new(), None);
    assert_eq!(first.len(), 1);

    let second = kernel.call("growing", EventArgs::new(), None);
    assert_eq!(second.len(), 2);
    kernel.shutdown();
}

#[test]
fn call_deadline_skips_remaining_subscribers() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let loader = ScriptedLoader::new();
    let (kernel, api) = kernel_with_hub(tmp.path(), &loader);

    api.on("slow", Arc::new(|_| {
        std::thread::sleep(Duration::from_millis(120));
        Ok(json!("finished anyway"))
    }))
    .expect("subscribe");
    api.on("slow", Arc::new(|_| Ok(json!("never reached"))))
        .expect("subscribe");

    let results = kernel.call("slow", EventArgs::new(), Some(Duration::from_millis(40)));
    assert_eq!(results.len(), 2);
    // A running callback is never interrupted; it completes past the
    // deadline. The one not yet started gets a timeout slot.
    assert_eq!(results[0], Ok(json!("finished anyway")));
    assert_eq!(results[1], Err(CallbackError::Timeout));
    kernel.shutdown();
}

#[test]
fn emit_does_not_block_the_caller() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let loader = ScriptedLoader::new();
    let (kernel, api) = kernel_with_hub(tmp.path(), &loader);

    api.on("lazy", Arc::new(|_| {
        std::thread::sleep(Duration::from_millis(200));
        Ok(json!("done"))
    }))
    .expect("subscribe");

    let before = Instant::now();
    let futures = api.emit("lazy", EventArgs::new()).expect("emit");
    assert!(before.elapsed() < Duration::from_millis(100));

    let outcomes: Vec<_> = futures.into_iter().map(|f| f.wait()).collect();
    assert_eq!(outcomes[0], Ok(json!("done")));
    kernel.shutdown();
}

#[test]
fn future_wait_timeout_hands_the_future_back() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let loader = ScriptedLoader::new();
    let (kernel, api) = kernel_with_hub(tmp.path(), &loader);

    api.on("slowish", Arc::new(|_| {
        std::thread::sleep(Duration::from_millis(100));
        Ok(json!("eventually"))
    }))
    .expect("subscribe");

    let mut futures = api.emit("slowish", EventArgs::new()).expect("emit");
    let future = futures.remove(0);
    let future = match future.wait_timeout(Duration::from_millis(5)) {
        Err(pending) => pending,
        Ok(early) => panic!("resolved suspiciously early: {early:?}"),
    };
    assert_eq!(future.wait(), Ok(json!("eventually")));
    kernel.shutdown();
}

#[test]
fn unload_removes_subscriptions_from_future_dispatch() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let loader = ScriptedLoader::new();
    let (kernel, api) = kernel_with_hub(tmp.path(), &loader);

    api.on("tick", Arc::new(|_| Ok(json!("hub heard it"))))
        .expect("subscribe");
    assert_eq!(kernel.call("tick", EventArgs::new(), None).len(), 1);

    kernel.unload("hub");
    assert!(kernel.call("tick", EventArgs::new(), None).is_empty());
    kernel.shutdown();
}

#[test]
fn dispatch_after_shutdown_is_empty() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let loader = ScriptedLoader::new();
    let (kernel, api) = kernel_with_hub(tmp.path(), &loader);

    api.on("late", Arc::new(|_| Ok(Value::Null)))
        .expect("subscribe");
    kernel.shutdown();

    assert!(kernel.emit("late", EventArgs::new()).is_empty());
    assert!(kernel.call("late", EventArgs::new(), None).is_empty());
}

#[test]
fn protected_key_rejected_through_facade() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let loader = ScriptedLoader::new();
    let (kernel, api) = kernel_with_hub(tmp.path(), &loader);

    let accepted = api
        .set_data("admin", json!("intruder"), mikro_types::Scope::Global)
        .expect("kernel alive");
    assert!(!accepted);
    assert_eq!(
        kernel.global_data().get("admin"),
        Some(&json!("Administrator"))
    );

    // Same key is fine in the plugin's own scope.
    let accepted = api
        .set_data("admin", json!("mine"), mikro_types::Scope::Local)
        .expect("kernel alive");
    assert!(accepted);
    kernel.shutdown();
}

#[test]
fn append_data_accumulates_into_seeded_list() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let loader = ScriptedLoader::new();
    let (kernel, api) = kernel_with_hub(tmp.path(), &loader);

    api.append_data("data", json!({"alert": "one"})).expect("append");
    api.append_data("data", json!({"alert": "two"})).expect("append");

    assert_eq!(
        kernel.global_data().get("data"),
        Some(&json!([{"alert": "one"}, {"alert": "two"}]))
    );
    kernel.shutdown();
}

#[test]
fn call_during_start_reaches_earlier_plugins() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_bundle(tmp.path(), "responder", "1.0", &[]);
    write_bundle(tmp.path(), "prober", "1.0", &["responder"]);

    let loader = ScriptedLoader::new();
    loader.on_start("responder", |api| {
        api.on("ping", Arc::new(|args| {
            let src = args
                .get("src")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            Ok(json!(format!("pong from {src}")))
        }))?;
        Ok(())
    });

    let heard: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&heard);
    loader.on_start("prober", move |api| {
        let results = api.call(
            "ping",
            args(&[("src", json!("prober"))]),
            Some(Duration::from_secs(1)),
        )?;
        for result in results.into_iter().flatten() {
            sink.lock().push(result);
        }
        Ok(())
    });

    let kernel = Kernel::new(fast_config(tmp.path()), Box::new(Arc::clone(&loader)));
    let report = kernel.init();
    assert!(report.is_clean());
    assert_eq!(*heard.lock(), vec![json!("pong from prober")]);
    kernel.shutdown();
}

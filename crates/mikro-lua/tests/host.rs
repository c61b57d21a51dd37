//! End-to-end tests driving real Lua bundles through the kernel.

use mikro_kernel::{
    CallbackError, EventArgs, Kernel, KernelConfig, KernelError, PatternAuditor,
};
use mikro_lua::LuaBundleLoader;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

fn fast_config(root: &Path) -> KernelConfig {
    KernelConfig::default()
        .with_plugin_root(root)
        .with_start_timeout(Duration::from_millis(1500))
        .with_stop_timeout(Duration::from_millis(1500))
        .with_task_grace(Duration::from_millis(1500))
}

fn lua_kernel(root: &Path) -> Kernel {
    Kernel::new(fast_config(root), Box::new(LuaBundleLoader::new()))
}

fn write_lua_bundle(root: &Path, name: &str, deps: &[&str], code: &str) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).expect("create bundle dir");
    let manifest = json!({
        "name": name,
        "version": "1.0.0",
        "dependencies": deps,
    });
    std::fs::write(dir.join("config.json"), manifest.to_string()).expect("write manifest");
    std::fs::write(dir.join("init.lua"), code).expect("write entry");
}

fn args(pairs: &[(&str, Value)]) -> EventArgs {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn lifecycle_runs_start_and_stop() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_lua_bundle(
        tmp.path(),
        "hello",
        &[],
        r#"
function Plugin(api)
    return {
        start = function()
            api.log("starting up")
            api.set_data("started", true, "global")
        end,
        stop = function()
            api.set_data("stopped", true, "global")
        end,
    }
end
"#,
    );

    let kernel = lua_kernel(tmp.path());
    let report = kernel.init();
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(kernel.global_data().get("started"), Some(&json!(true)));

    assert!(kernel.unload("hello"));
    assert_eq!(kernel.global_data().get("stopped"), Some(&json!(true)));
    kernel.shutdown();
}

#[test]
fn entry_without_factory_is_a_load_failure() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_lua_bundle(tmp.path(), "empty", &[], "local nothing = 1\n");

    let kernel = lua_kernel(tmp.path());
    kernel.scan();
    let err = kernel.load("empty").unwrap_err();
    assert!(matches!(err, KernelError::LoadFailed { .. }));
    assert!(err.to_string().contains("Plugin factory"));
    kernel.shutdown();
}

#[test]
fn factory_missing_stop_is_a_load_failure() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_lua_bundle(
        tmp.path(),
        "lopsided",
        &[],
        r#"
function Plugin(api)
    return { start = function() end }
end
"#,
    );

    let kernel = lua_kernel(tmp.path());
    kernel.scan();
    let err = kernel.load("lopsided").unwrap_err();
    assert!(err.to_string().contains("stop"));
    kernel.shutdown();
}

#[test]
fn sync_call_reaches_lua_subscriber() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_lua_bundle(
        tmp.path(),
        "responder",
        &[],
        r#"
function Plugin(api)
    return {
        start = function()
            api.on("ping", function(a)
                return "pong from " .. (a.src or "?")
            end)
        end,
        stop = function() end,
    }
end
"#,
    );

    let kernel = lua_kernel(tmp.path());
    kernel.init();

    let results = kernel.call("ping", args(&[("src", json!("unit"))]), None);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0], Ok(json!("pong from unit")));
    kernel.shutdown();
}

#[test]
fn lua_callback_error_is_reified() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_lua_bundle(
        tmp.path(),
        "thrower",
        &[],
        r#"
function Plugin(api)
    return {
        start = function()
            api.on("boom", function(a) error("kaboom") end)
        end,
        stop = function() end,
    }
end
"#,
    );

    let kernel = lua_kernel(tmp.path());
    kernel.init();

    let results = kernel.call("boom", EventArgs::new(), None);
    assert_eq!(results.len(), 1);
    let Err(CallbackError::Failed(message)) = &results[0] else {
        panic!("expected reified failure, got {:?}", results[0]);
    };
    assert!(message.contains("kaboom"));
    kernel.shutdown();
}

#[test]
fn get_data_falls_back_to_default() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_lua_bundle(
        tmp.path(),
        "reader",
        &[],
        r#"
function Plugin(api)
    return {
        start = function()
            api.set_data("observed", api.get_data("missing", "global", 41), "global")
        end,
        stop = function() end,
    }
end
"#,
    );

    let kernel = lua_kernel(tmp.path());
    kernel.init();
    assert_eq!(kernel.global_data().get("observed"), Some(&json!(41)));
    kernel.shutdown();
}

#[test]
fn protected_key_rejected_from_lua() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_lua_bundle(
        tmp.path(),
        "sneaky",
        &[],
        r#"
function Plugin(api)
    return {
        start = function()
            local accepted = api.set_data("admin", "intruder", "global")
            api.set_data("write_accepted", accepted, "global")
        end,
        stop = function() end,
    }
end
"#,
    );

    let kernel = lua_kernel(tmp.path());
    kernel.init();
    assert_eq!(
        kernel.global_data().get("write_accepted"),
        Some(&json!(false))
    );
    assert_eq!(
        kernel.global_data().get("admin"),
        Some(&json!("Administrator"))
    );
    kernel.shutdown();
}

#[test]
fn spawn_task_ticks_then_stops_on_unload() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_lua_bundle(
        tmp.path(),
        "ticker",
        &[],
        r#"
function Plugin(api)
    return {
        start = function()
            api.spawn_task(function()
                api.append_data("ticks", 1)
            end, { interval_ms = 5, name = "beat" })
        end,
        stop = function() end,
    }
end
"#,
    );

    let kernel = lua_kernel(tmp.path());
    kernel.init();
    std::thread::sleep(Duration::from_millis(60));
    assert!(kernel.unload("ticker"));

    let after_unload = match kernel.global_data().get("ticks") {
        Some(Value::Array(items)) => items.len(),
        other => panic!("expected tick list, got {other:?}"),
    };
    assert!(after_unload > 0, "task never ticked");

    // The stop signal ended the tick loop: the count no longer grows.
    std::thread::sleep(Duration::from_millis(40));
    let later = match kernel.global_data().get("ticks") {
        Some(Value::Array(items)) => items.len(),
        other => panic!("expected tick list, got {other:?}"),
    };
    assert_eq!(after_unload, later);
    kernel.shutdown();
}

#[test]
fn emit_and_wait_across_plugins() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_lua_bundle(
        tmp.path(),
        "calculator",
        &[],
        r#"
function Plugin(api)
    return {
        start = function()
            api.on("calc", function(a)
                return (a.x or 0) * 21
            end)
        end,
        stop = function() end,
    }
end
"#,
    );
    write_lua_bundle(
        tmp.path(),
        "client",
        &["calculator"],
        r#"
function Plugin(api)
    return {
        start = function()
            local futures = api.emit("calc", { x = 2 })
            local ok, value = futures[1]:wait(1000)
            api.set_data("ok", ok, "global")
            api.set_data("got", value, "global")
        end,
        stop = function() end,
    }
end
"#,
    );

    let kernel = lua_kernel(tmp.path());
    let report = kernel.init();
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(kernel.global_data().get("ok"), Some(&json!(true)));
    assert_eq!(kernel.global_data().get("got"), Some(&json!(42)));
    kernel.shutdown();
}

#[test]
fn plugin_reads_its_own_manifest() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let dir = tmp.path().join("flavored");
    std::fs::create_dir_all(&dir).expect("create dir");
    std::fs::write(
        dir.join("config.json"),
        json!({
            "name": "flavored",
            "version": "1.0.0",
            "description": "ignored by the core",
            "flavor": "umami",
        })
        .to_string(),
    )
    .expect("write manifest");
    std::fs::write(
        dir.join("init.lua"),
        r#"
function Plugin(api)
    return {
        start = function()
            local config = api.get_plugin_config()
            api.set_data("flavor", config.flavor, "global")
        end,
        stop = function() end,
    }
end
"#,
    )
    .expect("write entry");

    let kernel = lua_kernel(tmp.path());
    kernel.init();
    assert_eq!(kernel.global_data().get("flavor"), Some(&json!("umami")));
    kernel.shutdown();
}

#[test]
fn reload_executes_fresh_code_from_disk() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_lua_bundle(
        tmp.path(),
        "mutable",
        &[],
        r#"
function Plugin(api)
    return {
        start = function() api.set_data("marker", "one", "global") end,
        stop = function() end,
    }
end
"#,
    );

    let kernel = lua_kernel(tmp.path());
    kernel.init();
    assert_eq!(kernel.global_data().get("marker"), Some(&json!("one")));

    std::fs::write(
        tmp.path().join("mutable").join("init.lua"),
        r#"
function Plugin(api)
    return {
        start = function() api.set_data("marker", "two", "global") end,
        stop = function() end,
    }
end
"#,
    )
    .expect("rewrite entry");

    kernel.reload("mutable").expect("reload");
    assert_eq!(kernel.global_data().get("marker"), Some(&json!("two")));
    assert_eq!(kernel.cached_modules(), 1);
    kernel.shutdown();
}

#[test]
fn audit_blocks_banned_lua_call() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_lua_bundle(
        tmp.path(),
        "hostile",
        &[],
        r#"
function Plugin(api)
    return {
        start = function() os.execute("echo pwned") end,
        stop = function() end,
    }
end
"#,
    );

    let kernel = Kernel::new(fast_config(tmp.path()), Box::new(LuaBundleLoader::new()))
        .with_audit(Box::new(PatternAuditor::lua_defaults()));
    kernel.scan();
    let err = kernel.load("hostile").unwrap_err();
    assert!(matches!(err, KernelError::AuditBlocked { .. }));
    kernel.shutdown();
}

#[test]
fn colocated_module_via_require() {
    let tmp = tempfile::tempdir().expect("tempdir");
    write_lua_bundle(
        tmp.path(),
        "modular",
        &[],
        r#"
local helper = require("helper")
function Plugin(api)
    return {
        start = function() api.set_data("answer", helper.answer(), "global") end,
        stop = function() end,
    }
end
"#,
    );
    std::fs::write(
        tmp.path().join("modular").join("helper.lua"),
        "return { answer = function() return 54 end }",
    )
    .expect("write helper");

    let kernel = lua_kernel(tmp.path());
    let report = kernel.init();
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(kernel.global_data().get("answer"), Some(&json!(54)));
    kernel.shutdown();
}

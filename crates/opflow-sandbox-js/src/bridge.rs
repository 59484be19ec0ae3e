//! Host bridge between sandboxed flow code and the engine.
//!
//! Each invocation runs on its own blocking thread with its own boa
//! context. The execution context is parked in a thread local before
//! evaluation starts, and the registered native functions reach it from
//! there; plain `fn`-pointer natives keep the crate free of GC-traced
//! closure captures. Repository calls block the sandbox thread on the
//! async store via the runtime handle, so flow code sees a synchronous API
//! while the host stays fully async.

use std::cell::RefCell;
use std::time::Duration;

use boa_engine::object::FunctionObjectBuilder;
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsNativeError, JsResult, JsValue, NativeFunction};
use serde::Deserialize;
use serde_json::{json, Value};

use opflow_core::{EngineError, EntityRepository, ExecutionContext, TransactionManager};

/// Upper bound for one `sleep`/`setTimeout` call inside a flow. The
/// invocation-level timeout still bounds the whole run.
const MAX_SLEEP: Duration = Duration::from_secs(30);

/// Everything the native functions need for one invocation
pub(crate) struct HostBridge {
    /// The execution context built for this invocation
    pub context: ExecutionContext,
    /// Handle used to drive async store calls from the sandbox thread
    pub runtime: tokio::runtime::Handle,
}

thread_local! {
    static ACTIVE_BRIDGE: RefCell<Option<HostBridge>> = RefCell::new(None);
}

/// Clears the thread-local bridge when the invocation ends, even on panic
pub(crate) struct BridgeGuard;

impl BridgeGuard {
    pub fn install(bridge: HostBridge) -> Self {
        ACTIVE_BRIDGE.with(|cell| *cell.borrow_mut() = Some(bridge));
        BridgeGuard
    }
}

impl Drop for BridgeGuard {
    fn drop(&mut self) {
        ACTIVE_BRIDGE.with(|cell| *cell.borrow_mut() = None);
    }
}

/// One request from flow code to the host
#[derive(Debug, Deserialize)]
struct HostRequest {
    target: String,
    #[serde(default)]
    entity: Option<String>,
    op: String,
    #[serde(default)]
    arg: Value,
}

/// Register the host functions into a boa context
pub(crate) fn register_host_functions(context: &mut Context) -> JsResult<()> {
    let host_call = FunctionObjectBuilder::new(
        context.realm(),
        NativeFunction::from_fn_ptr(host_call),
    )
    .name(js_string!("__host_call"))
    .length(1)
    .constructor(false)
    .build();
    let host_log = FunctionObjectBuilder::new(
        context.realm(),
        NativeFunction::from_fn_ptr(host_log),
    )
    .name(js_string!("__host_log"))
    .length(2)
    .constructor(false)
    .build();
    let host_sleep = FunctionObjectBuilder::new(
        context.realm(),
        NativeFunction::from_fn_ptr(host_sleep),
    )
    .name(js_string!("__host_sleep"))
    .length(1)
    .constructor(false)
    .build();

    context.register_global_property(js_string!("__host_call"), host_call, Attribute::all())?;
    context.register_global_property(js_string!("__host_log"), host_log, Attribute::all())?;
    context.register_global_property(js_string!("__host_sleep"), host_sleep, Attribute::all())?;

    Ok(())
}

fn host_call(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let payload = args
        .first()
        .and_then(|v| v.as_string())
        .map(|s| s.to_std_string_escaped())
        .ok_or_else(|| {
            JsNativeError::typ().with_message("__host_call expects a JSON string argument")
        })?;

    let request: HostRequest = serde_json::from_str(&payload)
        .map_err(|e| JsNativeError::typ().with_message(format!("Malformed host request: {}", e)))?;

    let value = ACTIVE_BRIDGE.with(|cell| -> JsResult<Value> {
        let borrowed = cell.borrow();
        let bridge = match borrowed.as_ref() {
            Some(bridge) => bridge,
            None => {
                return Err(JsNativeError::error()
                    .with_message("host bridge is not attached to this thread")
                    .into())
            }
        };
        dispatch(bridge, request)
            .map_err(|e| JsNativeError::error().with_message(e.to_string()).into())
    })?;

    let body = serde_json::to_string(&json!({ "value": value })).map_err(|e| {
        JsNativeError::error().with_message(format!("Failed to encode host reply: {}", e))
    })?;

    Ok(JsValue::from(js_string!(body)))
}

fn dispatch(bridge: &HostBridge, request: HostRequest) -> Result<Value, EngineError> {
    match request.target.as_str() {
        "repository" => {
            let entity = request.entity.as_deref().unwrap_or_default();
            let repository = bridge.context.repositories.get(entity).ok_or_else(|| {
                EngineError::StoreError(format!("Unknown entity: {}", entity))
            })?;
            let arg = request.arg;
            let op = request.op;

            // Blocking here is fine: this is a dedicated sandbox thread,
            // not a runtime worker.
            bridge.runtime.block_on(async move {
                match op.as_str() {
                    "find" => Ok(Value::Array(repository.find(&arg).await?)),
                    "findOne" => Ok(repository.find_one(&arg).await?.unwrap_or(Value::Null)),
                    "save" => repository.save(arg).await,
                    "remove" => Ok(Value::from(repository.remove(&arg).await?)),
                    "count" => Ok(Value::from(repository.count(&arg).await?)),
                    other => Err(EngineError::StoreError(format!(
                        "Unknown repository operation: {}",
                        other
                    ))),
                }
            })
        }
        "transaction" => {
            let transactions = bridge.context.transactions.clone();
            let op = request.op;
            bridge.runtime.block_on(async move {
                match op.as_str() {
                    "begin" => transactions.begin().await.map(|_| Value::Null),
                    "commit" => transactions.commit().await.map(|_| Value::Null),
                    "rollback" => transactions.rollback().await.map(|_| Value::Null),
                    other => Err(EngineError::StoreError(format!(
                        "Unknown transaction operation: {}",
                        other
                    ))),
                }
            })
        }
        other => Err(EngineError::Internal(format!(
            "Unknown host target: {}",
            other
        ))),
    }
}

fn host_log(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let level = args
        .first()
        .and_then(|v| v.as_string())
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_else(|| "info".to_string());
    let message = args
        .get(1)
        .and_then(|v| v.as_string())
        .map(|s| s.to_std_string_escaped())
        .unwrap_or_default();

    match level.as_str() {
        "error" => tracing::error!(target: "opflow::flow", "{}", message),
        "warn" => tracing::warn!(target: "opflow::flow", "{}", message),
        _ => tracing::info!(target: "opflow::flow", "{}", message),
    }

    Ok(JsValue::undefined())
}

fn host_sleep(_this: &JsValue, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let ms = args
        .first()
        .and_then(|v| v.as_number())
        .unwrap_or(0.0)
        .clamp(0.0, MAX_SLEEP.as_millis() as f64);
    std::thread::sleep(Duration::from_millis(ms as u64));
    Ok(JsValue::undefined())
}

/// JavaScript prelude evaluated before the flow: the capability surface.
///
/// Only what is defined here (plus the engine's own pure globals such as
/// `JSON`, `Math`, and `Promise`) is reachable from flow code; there is no
/// filesystem, network, or process access to leak.
pub(crate) const PRELUDE: &str = r#"
"use strict";

function __fmtArgs(args) {
    var parts = [];
    for (var i = 0; i < args.length; i++) {
        var value = args[i];
        if (typeof value === "object" && value !== null) {
            parts.push(JSON.stringify(value));
        } else {
            parts.push(String(value));
        }
    }
    return parts.join(" ");
}

var console = {
    log: function () { __host_log("info", __fmtArgs(arguments)); },
    info: function () { __host_log("info", __fmtArgs(arguments)); },
    warn: function () { __host_log("warn", __fmtArgs(arguments)); },
    error: function () { __host_log("error", __fmtArgs(arguments)); }
};

function __repo(entity, op, arg) {
    var reply = __host_call(JSON.stringify({
        target: "repository",
        entity: entity,
        op: op,
        arg: arg === undefined ? null : arg
    }));
    return JSON.parse(reply).value;
}

function __tx(op) {
    var reply = __host_call(JSON.stringify({ target: "transaction", op: op, arg: null }));
    return JSON.parse(reply).value;
}

function __makeContext(params, actor, entities) {
    var repositories = {};
    for (var i = 0; i < entities.length; i++) {
        (function (entity) {
            repositories[entity] = {
                find: function (query) { return __repo(entity, "find", query); },
                findOne: function (query) { return __repo(entity, "findOne", query); },
                save: function (record) { return __repo(entity, "save", record); },
                remove: function (query) { return __repo(entity, "remove", query); },
                count: function (query) { return __repo(entity, "count", query); }
            };
        })(entities[i]);
    }
    return {
        params: params,
        actor: actor,
        repositories: repositories,
        tx: {
            begin: function () { return __tx("begin"); },
            commit: function () { return __tx("commit"); },
            rollback: function () { return __tx("rollback"); }
        }
    };
}

function sleep(ms) { __host_sleep(ms); }
function setTimeout(callback, delay) { __host_sleep(delay || 0); callback(); return 0; }
function clearTimeout(id) { }
"#;

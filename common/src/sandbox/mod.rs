// Script sandbox: an embedded JavaScript evaluator with a capability-only
// security model
//
// A script sees the job payload, its own id and four pre-bound catalog
// functions. Nothing else: no filesystem, no network, no process API.
// Each invocation gets a fresh context; contexts are never reused.

pub mod bridge;

use crate::catalog::{Catalog, Condition};
use crate::errors::SandboxError;
use crate::models::Job;
use boa_engine::property::Attribute;
use boa_engine::{
    js_string, Context, JsNativeError, JsResult, JsString, JsValue, NativeFunction, Source,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::warn;

/// Evaluate a script source against a fresh sandbox. The evaluator is
/// synchronous, so it runs on a blocking thread; catalog calls bridge
/// back into the runtime through the captured handle.
pub async fn execute(
    catalog: Arc<dyn Catalog>,
    script_id: String,
    job: Job,
    source: String,
) -> Result<(), SandboxError> {
    let handle = Handle::current();
    tokio::task::spawn_blocking(move || evaluate(handle, catalog, &script_id, &job, &source))
        .await
        .map_err(|_| SandboxError::Panicked)?
}

fn evaluate(
    handle: Handle,
    catalog: Arc<dyn Catalog>,
    script_id: &str,
    job: &Job,
    source: &str,
) -> Result<(), SandboxError> {
    let mut context = Context::default();

    let job_value = serde_json::to_value(job).map_err(|e| SandboxError::Injection {
        name: "job".to_string(),
        reason: e.to_string(),
    })?;
    let job_js = JsValue::from_json(&job_value, &mut context).map_err(|e| {
        SandboxError::Injection {
            name: "job".to_string(),
            reason: e.to_string(),
        }
    })?;

    context
        .register_global_property(
            js_string!("id"),
            JsValue::from(JsString::from(script_id)),
            Attribute::all(),
        )
        .and_then(|_| context.register_global_property(js_string!("job"), job_js, Attribute::all()))
        .map_err(|e| SandboxError::Injection {
            name: "globals".to_string(),
            reason: e.to_string(),
        })?;

    register_capabilities(&mut context, handle, catalog).map_err(|e| {
        SandboxError::Injection {
            name: "capabilities".to_string(),
            reason: e.to_string(),
        }
    })?;

    context
        .eval(Source::from_bytes(source.as_bytes()))
        .map_err(|e| SandboxError::Evaluation(e.to_string()))?;
    Ok(())
}

/// The capability table: the only route from a script to the catalog.
fn register_capabilities(
    context: &mut Context,
    handle: Handle,
    catalog: Arc<dyn Catalog>,
) -> JsResult<()> {
    // SAFETY: every closure below captures only `Arc` and runtime
    // handles, never garbage-collected engine types.
    {
        let handle = handle.clone();
        let catalog = catalog.clone();
        let function = unsafe {
            NativeFunction::from_closure(move |_this, args, ctx| {
                let (db, table, condition) = table_call_args(args, ctx)?;
                let result = handle.block_on(catalog.delete_where(&db, &table, &condition));
                Ok(swallow("rethinkDelete", result.map(|_| ())))
            })
        };
        context.register_global_callable(js_string!("rethinkDelete"), 3, function)?;
    }

    {
        let handle = handle.clone();
        let catalog = catalog.clone();
        let function = unsafe {
            NativeFunction::from_closure(move |_this, args, ctx| {
                let (db, table, condition) = table_call_args(args, ctx)?;
                let change = object_arg(args, 3, "change", ctx)?;
                let result =
                    handle.block_on(catalog.update_where(&db, &table, &condition, change));
                Ok(swallow("rethinkUpdate", result.map(|_| ())))
            })
        };
        context.register_global_callable(js_string!("rethinkUpdate"), 4, function)?;
    }

    {
        let handle = handle.clone();
        let catalog = catalog.clone();
        let function = unsafe {
            NativeFunction::from_closure(move |_this, args, ctx| {
                let db = string_arg(args, 0, "db", ctx)?;
                let table = string_arg(args, 1, "table", ctx)?;
                let record = object_arg(args, 2, "record", ctx)?;
                let result = handle.block_on(catalog.insert(&db, &table, record));
                Ok(swallow("rethinkInsert", result))
            })
        };
        context.register_global_callable(js_string!("rethinkInsert"), 3, function)?;
    }

    let function = unsafe {
        NativeFunction::from_closure(move |_this, args, ctx| {
            let (db, table, condition) = table_call_args(args, ctx)?;
            match handle.block_on(catalog.find_where(&db, &table, &condition)) {
                Ok(rows) => JsValue::from_json(&Value::Array(rows), ctx),
                Err(e) => {
                    warn!(capability = "rethinkGet", error = %e, "Capability call failed");
                    Ok(JsValue::from(false))
                }
            }
        })
    };
    context.register_global_callable(js_string!("rethinkGet"), 3, function)?;

    Ok(())
}

/// Shared `(db, table, condition)` head of a capability call.
fn table_call_args(
    args: &[JsValue],
    ctx: &mut Context,
) -> JsResult<(String, String, Condition)> {
    let db = string_arg(args, 0, "db", ctx)?;
    let table = string_arg(args, 1, "table", ctx)?;
    let condition = object_arg(args, 2, "condition", ctx)?;
    Ok((db, table, Condition::from_object(&condition)))
}

fn string_arg(args: &[JsValue], index: usize, name: &str, ctx: &mut Context) -> JsResult<String> {
    let value = args.get(index).cloned().unwrap_or(JsValue::undefined());
    if value.is_undefined() || value.is_null() {
        return Err(JsNativeError::typ()
            .with_message(format!("{name} must be a string"))
            .into());
    }
    Ok(value.to_string(ctx)?.to_std_string_escaped())
}

/// Read an argument as a flat object and apply the bridge conversion
/// policy to each field.
fn object_arg(args: &[JsValue], index: usize, name: &str, ctx: &mut Context) -> JsResult<Value> {
    let value = args.get(index).cloned().unwrap_or(JsValue::undefined());
    let json = value.to_json(ctx)?;
    bridge::coerce_object(&json).ok_or_else(|| {
        JsNativeError::typ()
            .with_message(format!("{name} must be an object"))
            .into()
    })
}

/// Capability failures surface to the script as `false`, not as an
/// exception: logged and swallowed.
fn swallow<E: std::fmt::Display>(capability: &str, result: Result<(), E>) -> JsValue {
    match result {
        Ok(()) => JsValue::from(true),
        Err(e) => {
            warn!(capability, error = %e, "Capability call failed");
            JsValue::from(false)
        }
    }
}

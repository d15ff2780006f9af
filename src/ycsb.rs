//! YCSB Operator
//!
//! Reference `ycsb` operator used by the benchmark binary and the end-to-end
//! tests: accounts keyed by integer, each holding a numeric balance.
//!
//! | Function       | Params      | Effect                                               |
//! |----------------|-------------|------------------------------------------------------|
//! | `insert`       | `[value]`   | Sets the key's value                                 |
//! | `insert_batch` | `[entries]` | Bulk load of the partition (batch insert only)       |
//! | `read`         | `[]`        | Returns the value; error if the key does not exist   |
//! | `update`       | `[]`        | Adds 1 to the balance                                |
//! | `transfer`     | `[key2]`    | Debits 1 here, then chains `credit` to `key2`        |
//! | `credit`       | `[]`        | Adds 1 to an existing balance                        |

use crate::graph::Operator;
use crate::protocol::entries_from_value;
use crate::state::Key;
use crate::worker::InvocationContext;

use anyhow::{Context, anyhow, bail};
use serde_json::{Value, json};

pub const OPERATOR_NAME: &str = "ycsb";

/// Builds the operator with every function registered.
pub fn ycsb_operator(partitions: u32) -> anyhow::Result<Operator> {
    let op = Operator::with_partitions(OPERATOR_NAME, partitions)?;

    op.register("insert", |ctx, params| async move {
        let value = params.into_iter().next().unwrap_or(Value::Null);
        ctx.put(value.clone())?;
        Ok(value)
    })?;

    op.register("insert_batch", |ctx, params| async move {
        let raw = params
            .first()
            .ok_or_else(|| anyhow!("insert_batch expects the entries as its only parameter"))?;
        let entries = entries_from_value(raw)?;
        let loaded = entries.len();
        ctx.batch_insert(entries)?;
        Ok(json!(loaded))
    })?;

    op.register("read", |ctx, _params| async move { existing(&ctx) })?;

    op.register("update", |ctx, _params| async move {
        let balance = balance(ctx.get()?.as_ref())?.unwrap_or(0);
        ctx.put(json!(balance + 1))?;
        Ok(json!(balance + 1))
    })?;

    op.register("transfer", |ctx, params| async move {
        let target = params
            .first()
            .and_then(Key::from_value)
            .ok_or_else(|| anyhow!("transfer expects the destination key as its only parameter"))?;

        let current = balance(Some(&existing(&ctx)?))?.unwrap_or(0);
        if current < 1 {
            bail!("insufficient funds on key {}", ctx.key()?);
        }
        ctx.put(json!(current - 1))?;
        ctx.call_remote_async(OPERATOR_NAME, "credit", target, vec![]);
        Ok(json!(current - 1))
    })?;

    op.register("credit", |ctx, _params| async move {
        let current = balance(Some(&existing(&ctx)?))?.unwrap_or(0);
        ctx.put(json!(current + 1))?;
        Ok(json!(current + 1))
    })?;

    Ok(op)
}

fn existing(ctx: &InvocationContext) -> anyhow::Result<Value> {
    match ctx.get()? {
        Some(value) => Ok(value),
        None => bail!("key {} does not exist", ctx.key()?),
    }
}

fn balance(value: Option<&Value>) -> anyhow::Result<Option<i64>> {
    value
        .map(|v| v.as_i64().context("value is not an integer balance"))
        .transpose()
}

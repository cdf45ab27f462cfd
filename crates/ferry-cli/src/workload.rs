//! Demo task driven by `ferry run`

use ferry_core::{marshal, unmarshal, IsolateId, IsolateScope, MarshalledValue, RuntimeError, Value};
use ferry_task::{TaskFactory, ThreePhaseTask};

/// Sums an array of integers inside the target isolate
///
/// Phase 1 copies the array out of the origin, Phase 2 rebuilds it in the
/// target and adds it up, Phase 3 returns `{ sum, isolate }` to the origin.
pub struct SumTask {
    input: MarshalledValue,
    sum: i32,
    ran_in: Option<IsolateId>,
}

impl TaskFactory for SumTask {
    type Args = Value;

    fn construct(scope: &mut IsolateScope, args: Value) -> Result<Self, RuntimeError> {
        if args.as_object().is_none() {
            return Err(RuntimeError::type_error(format!(
                "expected an array, got {}",
                args.type_name()
            )));
        }
        Ok(Self {
            input: marshal(&args, scope)?,
            sum: 0,
            ran_in: None,
        })
    }
}

impl ThreePhaseTask for SumTask {
    fn phase2(&mut self, scope: &mut IsolateScope) -> Result<(), RuntimeError> {
        let array = unmarshal(self.input.clone(), scope)?;
        let items = scope.array_items(&array)?;
        scope.release(&array);

        let mut sum: i32 = 0;
        for item in items {
            let n = item.as_i32().ok_or_else(|| {
                RuntimeError::type_error(format!("cannot sum a {}", item.type_name()))
            })?;
            sum = sum
                .checked_add(n)
                .ok_or_else(|| RuntimeError::range_error("sum overflows i32"))?;
        }

        self.sum = sum;
        self.ran_in = Some(scope.id());
        Ok(())
    }

    fn phase3(self: Box<Self>, scope: &mut IsolateScope) -> Result<Value, RuntimeError> {
        let isolate = self
            .ran_in
            .map(|id| Value::from(id.to_string()))
            .unwrap_or_default();
        Ok(scope.new_record(vec![
            ("sum".to_string(), Value::I32(self.sum)),
            ("isolate".to_string(), isolate),
        ]))
    }
}

/// Input array for task number `index`
///
/// With `poison`, the last element is a string so Phase 2 fails. Elements
/// saturate at `i32::MAX`; `RunConfig::validate` keeps real runs below it.
pub fn task_input(scope: &mut IsolateScope, index: usize, batch: usize, poison: bool) -> Value {
    let base = index.saturating_mul(batch);
    let mut items: Vec<Value> = (0..batch)
        .map(|i| Value::I32(i32::try_from(base.saturating_add(i)).unwrap_or(i32::MAX)))
        .collect();
    if poison {
        items.push(Value::from("poison"));
    }
    scope.new_array(items)
}

/// Sum Phase 2 will compute for an unpoisoned `task_input`
pub fn expected_sum(index: usize, batch: usize) -> i64 {
    let base = (index * batch) as i64;
    (0..batch as i64).map(|i| base + i).sum()
}

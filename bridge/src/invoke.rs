//! Invocation of the resolved scoring function
//!
//! One job: package the already-marshalled batch as the call's argument
//! container, dispatch the call, and classify what comes back. A normal
//! return joins the caller's scope; a raising callee becomes
//! [`BridgeError::Invocation`] carrying the rendered exception and, when
//! the backend has one, its traceback.

use crate::error::BridgeError;
use crate::runtime::{RawObj, RuntimeError};
use crate::scope::{CallScope, ObjRef};

/// Call `function` with `batch` as its single argument
pub(crate) fn call_scoring_fn<'s>(
    scope: &'s CallScope<'_>,
    function: RawObj,
    batch: &ObjRef<'_>,
) -> Result<ObjRef<'s>, BridgeError> {
    let args = scope.new_call_args(batch).map_err(invocation_err)?;
    scope.call(function, &args).map_err(invocation_err)
    // args guard drops here; the callee has returned by then.
}

fn invocation_err(err: RuntimeError) -> BridgeError {
    match err {
        RuntimeError::Raised { message, traceback } => {
            BridgeError::Invocation { message, traceback }
        }
        other => BridgeError::Invocation {
            message: other.to_string(),
            traceback: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::stub::{StubRuntime, StubValue};
    use crate::runtime::ForeignRuntime;

    #[test]
    fn test_successful_call_yields_scoped_result() {
        let mut runtime = StubRuntime::new();
        runtime.define("m", "echo", |arg: &StubValue| Ok(arg.clone()));
        let function = runtime.load_function("m", "echo").unwrap();

        {
            let scope = CallScope::new(&mut runtime);
            let batch = scope.intern_str("payload").unwrap();
            let result = call_scoring_fn(&scope, function, &batch).unwrap();

            assert_eq!(scope.read_str(&result).unwrap(), "payload");
            // batch + result outstanding; the argument container is
            // already back with the runtime.
            assert_eq!(scope.live(), 2);
        }

        runtime.release(function);
    }

    #[test]
    fn test_raising_callee_becomes_invocation_error() {
        let mut runtime = StubRuntime::new();
        runtime.define("m", "boom", |_: &StubValue| Err("math domain error".to_string()));
        let function = runtime.load_function("m", "boom").unwrap();

        {
            let scope = CallScope::new(&mut runtime);
            let batch = scope.new_seq(0).unwrap();
            let err = call_scoring_fn(&scope, function, &batch).unwrap_err();

            assert!(matches!(
                &err,
                BridgeError::Invocation { message, traceback: None }
                    if message.contains("math domain error")
            ));
            drop(batch);
            assert_eq!(scope.live(), 0);
        }

        runtime.release(function);
    }
}

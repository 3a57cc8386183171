//! Embedded CPython backend
//!
//! Implements [`ForeignRuntime`] over an in-process CPython interpreter
//! via `pyo3`. Handles are indices into a slot table of owned `Py<PyAny>`
//! references, so the bridge's release discipline maps one-to-one onto
//! interpreter reference counts.
//!
//! At most one `PyRuntime` exists per process: the interpreter is
//! process-global state. Dropping the runtime releases its slot table
//! and frees the host slot, but the interpreter itself stays resident
//! (CPython does not support re-initialization); a later
//! [`PyRuntime::start`] adopts it again.
//!
//! Callers do not hold the GIL: every method acquires it for its own
//! duration. Cross-call exclusivity comes from the bridge's admission
//! gate, which is also what keeps slot-table access single-threaded.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use pyo3::prelude::*;
use pyo3::types::{PyBool, PyBytes, PyDict, PyFloat, PyInt, PyList, PyString, PyTuple};
use pyo3::IntoPyObjectExt;

use crate::error::BridgeError;
use crate::runtime::{ForeignRuntime, RawObj, RuntimeError, ValueKind};

/// One interpreter host per process
static INTERPRETER_HOSTED: AtomicBool = AtomicBool::new(false);

/// [`ForeignRuntime`] backend over the embedded CPython interpreter
pub struct PyRuntime {
    slots: Vec<Option<Py<PyAny>>>,
    free: Vec<usize>,
}

impl PyRuntime {
    /// Initialize (or adopt) the embedded interpreter
    ///
    /// # Errors
    /// [`BridgeError::RuntimeInit`] if another `PyRuntime` is already
    /// hosting the interpreter.
    pub fn start() -> Result<Self, BridgeError> {
        if INTERPRETER_HOSTED.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::RuntimeInit {
                reason: "embedded interpreter is already hosted by another PyRuntime".to_string(),
            });
        }
        pyo3::prepare_freethreaded_python();
        Ok(Self {
            slots: Vec::new(),
            free: Vec::new(),
        })
    }

    /// Start and prepend directories to the module search path
    ///
    /// Use this when the scoring module lives outside the default
    /// `sys.path` (e.g. a `py/` directory next to the binary).
    pub fn with_search_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Self, BridgeError> {
        let runtime = Self::start()?;
        for path in paths {
            runtime.prepend_search_path(path.as_ref())?;
        }
        Ok(runtime)
    }

    /// Prepend one directory to `sys.path`
    pub fn prepend_search_path(&self, dir: &Path) -> Result<(), BridgeError> {
        Python::with_gil(|py| -> PyResult<()> {
            let sys = py.import("sys")?;
            let path = sys.getattr("path")?;
            path.call_method1("insert", (0, dir.to_string_lossy().as_ref()))?;
            Ok(())
        })
        .map_err(|err| BridgeError::RuntimeInit {
            reason: format!("cannot extend module search path: {err}"),
        })
    }

    fn insert(&mut self, obj: Py<PyAny>) -> RawObj {
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(obj);
                index
            }
            None => {
                self.slots.push(Some(obj));
                self.slots.len() - 1
            }
        };
        RawObj::new(index as u64)
    }

    fn get(&self, handle: RawObj) -> &Py<PyAny> {
        let index = handle.value() as usize;
        match self.slots.get(index).and_then(Option::as_ref) {
            Some(obj) => obj,
            None => panic!("foreign object handle {index} used after release (or never issued)"),
        }
    }

    fn take(&mut self, handle: RawObj) -> Py<PyAny> {
        let index = handle.value() as usize;
        match self.slots.get_mut(index).and_then(|slot| slot.take()) {
            Some(obj) => {
                self.free.push(index);
                obj
            }
            None => panic!("foreign object handle {index} released twice (or never issued)"),
        }
    }
}

impl Drop for PyRuntime {
    fn drop(&mut self) {
        // Dropping the owned references with the GIL held decrefs
        // immediately instead of queueing.
        Python::with_gil(|_py| self.slots.clear());
        INTERPRETER_HOSTED.store(false, Ordering::SeqCst);
    }
}

fn raised(py: Python<'_>, err: PyErr) -> RuntimeError {
    let traceback = err.traceback(py).and_then(|tb| tb.format().ok());
    RuntimeError::Raised {
        message: err.to_string(),
        traceback,
    }
}

fn kind_of(value: &Bound<'_, PyAny>) -> ValueKind {
    if value.is_instance_of::<PyString>() {
        ValueKind::Str
    } else if value.is_instance_of::<PyBool>() {
        // Python bools are ints; the result contract treats them so.
        ValueKind::Int
    } else if value.is_instance_of::<PyInt>() {
        ValueKind::Int
    } else if value.is_instance_of::<PyFloat>() {
        ValueKind::Float
    } else if value.is_instance_of::<PyBytes>() {
        ValueKind::Bytes
    } else if value.is_instance_of::<PyList>() || value.is_instance_of::<PyTuple>() {
        ValueKind::Seq
    } else if value.is_instance_of::<PyDict>() {
        ValueKind::Map
    } else if value.is_callable() {
        ValueKind::Fn
    } else {
        ValueKind::Other
    }
}

impl ForeignRuntime for PyRuntime {
    fn intern_str(&mut self, text: &str) -> Result<RawObj, RuntimeError> {
        if text.contains('\0') {
            return Err(RuntimeError::Text {
                reason: "interior NUL byte".to_string(),
            });
        }
        Python::with_gil(|py| {
            let obj = PyString::new(py, text);
            Ok(self.insert(obj.into_any().unbind()))
        })
    }

    fn new_int(&mut self, value: i64) -> Result<RawObj, RuntimeError> {
        Python::with_gil(|py| {
            let obj = value.into_py_any(py).map_err(|err| raised(py, err))?;
            Ok(self.insert(obj))
        })
    }

    fn new_float(&mut self, value: f64) -> Result<RawObj, RuntimeError> {
        Python::with_gil(|py| {
            let obj = PyFloat::new(py, value);
            Ok(self.insert(obj.into_any().unbind()))
        })
    }

    fn new_bytes(&mut self, data: &[u8]) -> Result<RawObj, RuntimeError> {
        Python::with_gil(|py| {
            let obj = PyBytes::new(py, data);
            Ok(self.insert(obj.into_any().unbind()))
        })
    }

    fn new_seq(&mut self, len: usize) -> Result<RawObj, RuntimeError> {
        Python::with_gil(|py| {
            let placeholders = (0..len).map(|_| py.None());
            let list = PyList::new(py, placeholders).map_err(|err| raised(py, err))?;
            Ok(self.insert(list.into_any().unbind()))
        })
    }

    fn new_map(&mut self) -> Result<RawObj, RuntimeError> {
        Python::with_gil(|py| {
            let dict = PyDict::new(py);
            Ok(self.insert(dict.into_any().unbind()))
        })
    }

    fn new_call_args(&mut self, arg: RawObj) -> Result<RawObj, RuntimeError> {
        Python::with_gil(|py| {
            let arg = self.get(arg).bind(py).clone();
            let tuple = PyTuple::new(py, [arg]).map_err(|err| raised(py, err))?;
            Ok(self.insert(tuple.into_any().unbind()))
        })
    }

    fn seq_set(&mut self, seq: RawObj, index: usize, item: RawObj) -> Result<(), RuntimeError> {
        Python::with_gil(|py| {
            let seq = self.get(seq).bind(py);
            let list = seq.downcast::<PyList>().map_err(|_| RuntimeError::Shape {
                expected: ValueKind::Seq,
                found: kind_of(seq),
            })?;
            let item = self.get(item).bind(py).clone();
            list.set_item(index, item).map_err(|err| raised(py, err))
        })
    }

    fn map_set(&mut self, map: RawObj, key: RawObj, value: RawObj) -> Result<(), RuntimeError> {
        Python::with_gil(|py| {
            let map = self.get(map).bind(py);
            let dict = map.downcast::<PyDict>().map_err(|_| RuntimeError::Shape {
                expected: ValueKind::Map,
                found: kind_of(map),
            })?;
            let key = self.get(key).bind(py).clone();
            let value = self.get(value).bind(py).clone();
            dict.set_item(key, value).map_err(|err| raised(py, err))
        })
    }

    fn load_function(&mut self, module: &str, function: &str) -> Result<RawObj, RuntimeError> {
        Python::with_gil(|py| {
            let resolve_err = |reason: String| RuntimeError::Resolve {
                module: module.to_string(),
                function: function.to_string(),
                reason,
            };
            let loaded = py
                .import(module)
                .map_err(|err| resolve_err(err.to_string()))?;
            let attr = loaded
                .getattr(function)
                .map_err(|err| resolve_err(err.to_string()))?;
            if !attr.is_callable() {
                return Err(resolve_err("attribute is not callable".to_string()));
            }
            Ok(self.insert(attr.unbind()))
        })
    }

    fn call(&mut self, function: RawObj, args: RawObj) -> Result<RawObj, RuntimeError> {
        Python::with_gil(|py| {
            let target = self.get(function).bind(py).clone();
            let args = self.get(args).bind(py);
            let tuple = args
                .downcast::<PyTuple>()
                .map_err(|_| RuntimeError::Shape {
                    expected: ValueKind::Seq,
                    found: kind_of(args),
                })?
                .clone();
            match target.call1(tuple) {
                Ok(result) => Ok(self.insert(result.unbind())),
                Err(err) => Err(raised(py, err)),
            }
        })
    }

    fn kind(&self, value: RawObj) -> ValueKind {
        Python::with_gil(|py| kind_of(self.get(value).bind(py)))
    }

    fn seq_len(&self, value: RawObj) -> Result<usize, RuntimeError> {
        Python::with_gil(|py| {
            let obj = self.get(value).bind(py);
            if kind_of(obj) != ValueKind::Seq {
                return Err(RuntimeError::Shape {
                    expected: ValueKind::Seq,
                    found: kind_of(obj),
                });
            }
            obj.len().map_err(|err| raised(py, err))
        })
    }

    fn seq_get(&mut self, seq: RawObj, index: usize) -> Result<RawObj, RuntimeError> {
        Python::with_gil(|py| {
            let obj = self.get(seq).bind(py);
            if kind_of(obj) != ValueKind::Seq {
                return Err(RuntimeError::Shape {
                    expected: ValueKind::Seq,
                    found: kind_of(obj),
                });
            }
            let item = obj.get_item(index).map_err(|err| raised(py, err))?;
            Ok(self.insert(item.unbind()))
        })
    }

    fn read_str(&self, value: RawObj) -> Result<String, RuntimeError> {
        Python::with_gil(|py| {
            let obj = self.get(value).bind(py);
            if !obj.is_instance_of::<PyString>() {
                return Err(RuntimeError::Shape {
                    expected: ValueKind::Str,
                    found: kind_of(obj),
                });
            }
            obj.extract::<String>().map_err(|err| RuntimeError::Text {
                reason: err.to_string(),
            })
        })
    }

    fn read_int(&self, value: RawObj) -> Result<i64, RuntimeError> {
        Python::with_gil(|py| {
            let obj = self.get(value).bind(py);
            obj.extract::<i64>().map_err(|_| RuntimeError::Shape {
                expected: ValueKind::Int,
                found: kind_of(obj),
            })
        })
    }

    fn release(&mut self, value: RawObj) {
        Python::with_gil(|_py| {
            // Decref happens now, with the GIL held.
            drop(self.take(value));
        });
    }
}

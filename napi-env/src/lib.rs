//! A Node-API style bridge between native code and a garbage-collected host runtime.
//!
//! Native code never holds host values directly. It holds small integer ids and passes them back
//! through the boundary entry points in [`abi`]. This crate provides:
//! - Per-context state ([`Env`]) and the registry of contexts ([`EnvRegistry`])
//! - Generation-checked id tables ([`Store`])
//! - Nested handle lifetimes ([`ScopeKind`], [`Env::open_scope`], [`Env::close_scope`])
//! - Persistent, reference-counted handles that degrade to weak at count zero ([`RefId`])
//! - A one-slot exception mailbox and the last-error record ([`Status`], [`ExtendedErrorInfo`])
//! - Promise capabilities and in-flight call records ([`DeferredId`], [`CallbackInfo`])
//! - Stable native addresses for host buffers ([`Env::get_array_buffer_pointer`])
//!
//! The host runtime itself is modelled by a small non-moving mark/sweep [`Heap`].
//!
//! # Ids
//!
//! Every id handed to native code is a packed `{ index: u24, generation: u8 }`. Id `0` is never
//! issued, so it can serve as `NULL`. Removing an entry bumps its slot's generation: a stale id is
//! rejected even after the slot has been reused.
//!
//! # Error channels
//!
//! Entry points report failure two ways:
//! - **Last error**: every entry point records its [`Status`] in a control block in native memory,
//!   readable through [`abi::napi_get_last_error_info`].
//! - **Pending exception**: a host exception raised during a call is captured in the env's mailbox
//!   and reported as [`Status::PendingException`]. Entry points that can run host code refuse to
//!   start while an exception is pending.
//!
//! # Finalization
//!
//! Collections never run native code. Finalizers of weak references and the native mirrors of
//! collected buffers are queued and run at the next drain point ([`Env::drain_finalizers`], env
//! disposal, or after [`Env::collect_garbage`] when [`EnvOptions::run_finalizers_after_gc`] is
//! set).

pub mod abi;
mod callback_info;
mod deferred;
mod env;
mod error;
mod finalizer;
mod gc;
mod handle_store;
mod heap;
mod memory;
mod module;
mod pointer;
mod reference;
mod registry;
mod scope;
mod status;
mod store;
mod try_catch;
mod value;

pub use crate::callback_info::CallbackInfo;
pub use crate::callback_info::CallbackInfoId;
pub use crate::deferred::DeferredId;
pub use crate::env::Env;
pub use crate::env::EnvOptions;
pub use crate::env::NativeCallback;
pub use crate::env::NAPI_VERSION;
pub use crate::error::NapiError;
pub use crate::error::VmError;
pub use crate::finalizer::FinalizeCallback;
pub use crate::finalizer::Finalizer;
pub use crate::gc::GcObject;
pub use crate::gc::GcString;
pub use crate::gc::RootId;
pub use crate::gc::WeakObject;
pub use crate::handle_store::HandleId;
pub use crate::heap::ErrorKind;
pub use crate::heap::FunctionKind;
pub use crate::heap::Heap;
pub use crate::heap::HeapLimits;
pub use crate::heap::HostFn;
pub use crate::heap::PromiseState;
pub use crate::heap::RootScope;
pub use crate::heap::TypedArrayInfo;
pub use crate::heap::TypedArrayType;
pub use crate::memory::LinearMemory;
pub use crate::memory::NativeMemory;
pub use crate::module::register_module;
pub use crate::module::ModuleError;
pub use crate::module::ModuleInit;
pub use crate::module::RegisteredModule;
pub use crate::reference::RefId;
pub use crate::reference::ReferenceOwnership;
pub use crate::registry::EnvId;
pub use crate::registry::EnvRegistry;
pub use crate::scope::ScopeId;
pub use crate::scope::ScopeKind;
pub use crate::status::ExtendedErrorInfo;
pub use crate::status::Status;
pub use crate::store::Store;
pub use crate::store::StoreId;
pub use crate::store::TableId;
pub use crate::store::MAX_STORE_ENTRIES;
pub use crate::value::Value;

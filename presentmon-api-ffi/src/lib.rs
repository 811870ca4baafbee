// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stable C ABI over the PresentMon middleware.
//!
//! A process holds at most one session, opened with `pmOpenSession` (or
//! the override variant) and closed with `pmCloseSession`; every other
//! entry point reports `PM_STATUS_SESSION_NOT_OPEN` until then. Cloned
//! introspection trees and registered queries are owned by the caller and
//! returned through the matching `pmFree*` entry point.

#![allow(non_camel_case_types, non_snake_case)]

use std::ffi::CStr;
use std::os::raw::c_char;
use std::sync::Mutex;

use presentmon_ipc::intro::api::PM_INTROSPECTION_ROOT;
use presentmon_ipc::values::{PmMetric, PmStat, PmStatus};
use presentmon_middleware::{DynamicQuery, Middleware, MiddlewareOptions, QueryElement};

pub use presentmon_ipc::intro::api;
pub use presentmon_ipc::values::PmStatus as PM_STATUS;

static SESSION: Mutex<Option<Middleware>> = Mutex::new(None);

/// One output slot of a dynamic query; `dataOffset`/`dataSize` are filled
/// in by `pmRegisterDynamicQuery`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PM_QUERY_ELEMENT {
    pub metric: PmMetric,
    pub stat: PmStat,
    pub deviceId: u32,
    pub arrayIndex: u32,
    pub dataOffset: u64,
    pub dataSize: u64,
}

/// Opaque dynamic query handle.
pub struct PM_DYNAMIC_QUERY {
    inner: DynamicQuery,
}

unsafe fn optional_string(text: *const c_char) -> Option<String> {
    if text.is_null() {
        return None;
    }
    CStr::from_ptr(text)
        .to_str()
        .ok()
        .map(|value| value.to_string())
}

fn open_session(options: MiddlewareOptions) -> PmStatus {
    let Ok(mut session) = SESSION.lock() else {
        return PmStatus::Failure;
    };
    if session.is_some() {
        return PmStatus::Failure;
    }
    match Middleware::new(options) {
        Ok(middleware) => {
            *session = Some(middleware);
            PmStatus::Success
        }
        Err(_) => PmStatus::Failure,
    }
}

#[no_mangle]
pub extern "C" fn pmOpenSession() -> PmStatus {
    open_session(MiddlewareOptions::default())
}

/// Opens a session against a non-default control pipe and/or introspection
/// segment. Either argument may be null to keep the default.
///
/// # Safety
/// Non-null arguments must point at NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn pmOpenSessionWithOptions(
    pControlPipeName: *const c_char,
    pIntrospectionShmName: *const c_char,
) -> PmStatus {
    open_session(MiddlewareOptions {
        pipe_name: optional_string(pControlPipeName),
        shm_name: optional_string(pIntrospectionShmName),
    })
}

#[no_mangle]
pub extern "C" fn pmCloseSession() -> PmStatus {
    let Ok(mut session) = SESSION.lock() else {
        return PmStatus::Failure;
    };
    match session.take() {
        Some(_) => PmStatus::Success,
        None => PmStatus::SessionNotOpen,
    }
}

/// Clones the introspection catalog into a caller-owned tree; release it
/// with `pmFreeInterface`.
///
/// # Safety
/// `ppInterface` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn pmEnumerateInterface(
    ppInterface: *mut *const PM_INTROSPECTION_ROOT,
) -> PmStatus {
    if ppInterface.is_null() {
        return PmStatus::Failure;
    }
    let Ok(session) = SESSION.lock() else {
        return PmStatus::Failure;
    };
    let Some(middleware) = session.as_ref() else {
        return PmStatus::SessionNotOpen;
    };
    match middleware.introspection_root() {
        Ok(root) => {
            *ppInterface = root;
            PmStatus::Success
        }
        Err(_) => PmStatus::Failure,
    }
}

/// Frees a tree returned by `pmEnumerateInterface`; the single underlying
/// block reclaims every node and string at once.
///
/// # Safety
/// `pInterface` must come from `pmEnumerateInterface` and must not be used
/// afterwards.
#[no_mangle]
pub unsafe extern "C" fn pmFreeInterface(pInterface: *const PM_INTROSPECTION_ROOT) -> PmStatus {
    if pInterface.is_null() {
        return PmStatus::Failure;
    }
    Middleware::free_introspection_root(pInterface as *mut PM_INTROSPECTION_ROOT);
    PmStatus::Success
}

/// Begins tracking `processId`: negotiates its frame stream with the
/// service and opens the returned ring.
#[no_mangle]
pub extern "C" fn pmStartTrackingProcess(processId: u32) -> PmStatus {
    let Ok(mut session) = SESSION.lock() else {
        return PmStatus::Failure;
    };
    match session.as_mut() {
        Some(middleware) => middleware.start_streaming(processId),
        None => PmStatus::SessionNotOpen,
    }
}

#[no_mangle]
pub extern "C" fn pmStopTrackingProcess(processId: u32) -> PmStatus {
    let Ok(mut session) = SESSION.lock() else {
        return PmStatus::Failure;
    };
    match session.as_mut() {
        Some(middleware) => middleware.stop_streaming(processId),
        None => PmStatus::SessionNotOpen,
    }
}

/// Validates the elements, assigns their blob offsets in place, and
/// returns a query handle through `ppQuery`.
///
/// # Safety
/// `ppQuery` must be valid and `pElements` must point at `numElements`
/// initialized elements.
#[no_mangle]
pub unsafe extern "C" fn pmRegisterDynamicQuery(
    ppQuery: *mut *mut PM_DYNAMIC_QUERY,
    pElements: *mut PM_QUERY_ELEMENT,
    numElements: u64,
    processId: u32,
    windowSizeMs: f64,
    metricOffsetMs: f64,
) -> PmStatus {
    if ppQuery.is_null() || (pElements.is_null() && numElements > 0) {
        return PmStatus::Failure;
    }
    let Ok(session) = SESSION.lock() else {
        return PmStatus::Failure;
    };
    let Some(middleware) = session.as_ref() else {
        return PmStatus::SessionNotOpen;
    };

    let raw = std::slice::from_raw_parts_mut(pElements, numElements as usize);
    let mut elements: Vec<QueryElement> = raw
        .iter()
        .map(|e| QueryElement::new(e.metric, e.stat, e.deviceId, e.arrayIndex))
        .collect();
    match middleware.register_dynamic_query(&mut elements, processId, windowSizeMs, metricOffsetMs)
    {
        Ok(query) => {
            for (slot, element) in raw.iter_mut().zip(&elements) {
                slot.dataOffset = element.data_offset;
                slot.dataSize = element.data_size;
            }
            *ppQuery = Box::into_raw(Box::new(PM_DYNAMIC_QUERY { inner: *query }));
            PmStatus::Success
        }
        Err(_) => PmStatus::Failure,
    }
}

/// # Safety
/// `pQuery` must come from `pmRegisterDynamicQuery` and must not be used
/// afterwards.
#[no_mangle]
pub unsafe extern "C" fn pmFreeDynamicQuery(pQuery: *mut PM_DYNAMIC_QUERY) -> PmStatus {
    if pQuery.is_null() {
        return PmStatus::Failure;
    }
    drop(Box::from_raw(pQuery));
    PmStatus::Success
}

/// Evaluates the query. On entry `*pNumSwapChains` is the row capacity of
/// `pBlob` (each row is the packed element size of the query); on success
/// it carries the number of rows written.
///
/// # Safety
/// `pBlob` must hold at least capacity × stride bytes and `pNumSwapChains`
/// must be valid.
#[no_mangle]
pub unsafe extern "C" fn pmPollDynamicQuery(
    pQuery: *mut PM_DYNAMIC_QUERY,
    pBlob: *mut u8,
    pNumSwapChains: *mut u32,
) -> PmStatus {
    if pQuery.is_null() || pBlob.is_null() || pNumSwapChains.is_null() {
        return PmStatus::Failure;
    }
    let Ok(session) = SESSION.lock() else {
        return PmStatus::Failure;
    };
    let Some(middleware) = session.as_ref() else {
        return PmStatus::SessionNotOpen;
    };
    let query = &mut (*pQuery).inner;
    let capacity = *pNumSwapChains as usize;
    let blob = std::slice::from_raw_parts_mut(pBlob, query.blob_stride() * capacity);
    match middleware.poll_dynamic_query(query, blob, &mut *pNumSwapChains) {
        Ok(()) => PmStatus::Success,
        Err(_) => PmStatus::Failure,
    }
}

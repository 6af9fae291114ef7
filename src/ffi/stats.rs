//! `Isar_Stats_*` accessors.
//!
//! A stats callback receives an opaque report that is only valid for the
//! duration of the callback, as is every pointer read from it. Accessors
//! given a null pointer or a member of another type return zero or null.

use std::ffi::{CString, c_char, c_void};
use std::ptr;

use crate::stats::{Stats, StatsMember, StatsReport, StatsValue};

/// C view of one member. Strings are converted eagerly.
struct MemberView<'a> {
    member: &'a StatsMember,
    name: CString,
    string: Option<CString>,
    strings: Vec<CString>,
    string_ptrs: Vec<*const c_char>,
}

struct StatsView<'a> {
    stats: &'a Stats,
    id: CString,
    json: CString,
    members: Vec<MemberView<'a>>,
    member_ptrs: Vec<*const c_void>,
}

struct ReportView<'a> {
    stats: Vec<StatsView<'a>>,
    stats_ptrs: Vec<*const c_void>,
    types: Vec<u32>,
}

/// Interior NULs cannot cross the boundary; they are dropped.
fn lossy_c_string(text: &str) -> CString {
    CString::new(text.replace('\0', "")).unwrap_or_default()
}

impl<'a> MemberView<'a> {
    fn new(member: &'a StatsMember) -> Self {
        let string = match member.value() {
            Some(StatsValue::String(value)) => Some(lossy_c_string(value)),
            _ => None,
        };
        let strings: Vec<CString> = match member.value() {
            Some(StatsValue::StringArray(values)) => values.iter().map(|value| lossy_c_string(value)).collect(),
            _ => Vec::new(),
        };
        let string_ptrs = strings.iter().map(|value| value.as_ptr()).collect();
        MemberView { member, name: lossy_c_string(member.name()), string, strings, string_ptrs }
    }
}

impl<'a> StatsView<'a> {
    fn new(stats: &'a Stats) -> Self {
        let members: Vec<MemberView<'a>> = stats.members.iter().map(MemberView::new).collect();
        let member_ptrs = members.iter().map(|member| ptr::from_ref(member).cast::<c_void>()).collect();
        StatsView { stats, id: lossy_c_string(&stats.id), json: lossy_c_string(&stats.to_json()), members, member_ptrs }
    }
}

/// Runs `f` with an opaque pointer to a C view of `report`.
pub(crate) fn with_report_view(report: &StatsReport, f: impl FnOnce(*const c_void)) {
    let stats: Vec<StatsView<'_>> = report.stats.iter().map(StatsView::new).collect();
    let stats_ptrs = stats.iter().map(|view| ptr::from_ref(view).cast::<c_void>()).collect();
    let types = stats.iter().map(|view| view.stats.kind.as_raw()).collect();
    let view = ReportView { stats, stats_ptrs, types };
    f(ptr::from_ref(&view).cast());
}

unsafe fn report<'a>(ptr: *const c_void) -> Option<&'a ReportView<'a>> {
    unsafe { ptr.cast::<ReportView<'a>>().as_ref() }
}

unsafe fn stats<'a>(ptr: *const c_void) -> Option<&'a StatsView<'a>> {
    unsafe { ptr.cast::<StatsView<'a>>().as_ref() }
}

unsafe fn member<'a>(ptr: *const c_void) -> Option<&'a MemberView<'a>> {
    unsafe { ptr.cast::<MemberView<'a>>().as_ref() }
}

unsafe fn write_len(length: *mut usize, len: usize) {
    if !length.is_null() {
        unsafe { length.write(len) };
    }
}

/// Stats objects of a report and, through `types`, their `StatsType`s.
///
/// # Safety
///
/// `report` must be null or the pointer handed to a stats callback, used
/// within that callback. `length` and `types` must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Isar_Stats_GetStatsList(
    report_ptr: *const c_void,
    length: *mut usize,
    types: *mut *mut u32,
) -> *mut *const c_void {
    let Some(view) = (unsafe { report(report_ptr) }) else {
        unsafe { write_len(length, 0) };
        return ptr::null_mut();
    };
    unsafe { write_len(length, view.stats.len()) };
    if !types.is_null() {
        unsafe { types.write(view.types.as_ptr().cast_mut()) };
    }
    view.stats_ptrs.as_ptr().cast_mut()
}

/// # Safety
///
/// `stats` must be null or an element of a live stats list.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Isar_Stats_GetJson(stats_ptr: *const c_void) -> *const c_char {
    unsafe { stats(stats_ptr) }.map_or(ptr::null(), |view| view.json.as_ptr())
}

/// # Safety
///
/// `stats` must be null or an element of a live stats list.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Isar_Stats_GetId(stats_ptr: *const c_void) -> *const c_char {
    unsafe { stats(stats_ptr) }.map_or(ptr::null(), |view| view.id.as_ptr())
}

/// # Safety
///
/// `stats` must be null or an element of a live stats list.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Isar_Stats_GetType(stats_ptr: *const c_void) -> u32 {
    unsafe { stats(stats_ptr) }.map_or(0, |view| view.stats.kind.as_raw())
}

/// # Safety
///
/// `stats` must be null or an element of a live stats list.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Isar_Stats_GetTimestamp(stats_ptr: *const c_void) -> i64 {
    unsafe { stats(stats_ptr) }.map_or(0, |view| view.stats.timestamp_us)
}

/// An array of `length` member pointers.
///
/// # Safety
///
/// `stats` must be null or an element of a live stats list; `length` must
/// be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Isar_Stats_GetMembers(stats_ptr: *const c_void, length: *mut usize) -> *mut c_void {
    let Some(view) = (unsafe { stats(stats_ptr) }) else {
        unsafe { write_len(length, 0) };
        return ptr::null_mut();
    };
    unsafe { write_len(length, view.members.len()) };
    view.member_ptrs.as_ptr().cast_mut().cast()
}

/// # Safety
///
/// `member` must be null or an element of a live member array.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Isar_Stats_GetMemberName(member_ptr: *const c_void) -> *const c_char {
    unsafe { member(member_ptr) }.map_or(ptr::null(), |view| view.name.as_ptr())
}

/// # Safety
///
/// `member` must be null or an element of a live member array.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Isar_Stats_GetMemberType(member_ptr: *const c_void) -> u32 {
    unsafe { member(member_ptr) }.map_or(0, |view| view.member.member_type().as_raw())
}

/// # Safety
///
/// `member` must be null or an element of a live member array.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Isar_Stats_IsMemberDefined(member_ptr: *const c_void) -> bool {
    unsafe { member(member_ptr) }.is_some_and(|view| view.member.is_defined())
}

macro_rules! scalar_getter {
    ($(#[$meta:meta])* $name:ident, $variant:ident, $ty:ty) => {
        $(#[$meta])*
        ///
        /// # Safety
        ///
        /// `member` must be null or an element of a live member array.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $name(member_ptr: *const c_void) -> $ty {
            match unsafe { member(member_ptr) }.and_then(|view| view.member.value()) {
                Some(StatsValue::$variant(value)) => *value,
                _ => <$ty>::default(),
            }
        }
    };
}

scalar_getter!(Isar_Stats_MemberGetBool, Bool, bool);
scalar_getter!(Isar_Stats_MemberGetInt, Int, i32);
scalar_getter!(Isar_Stats_MemberGetUint, Uint, u32);
scalar_getter!(Isar_Stats_MemberGetLong, Long, i64);
scalar_getter!(Isar_Stats_MemberGetUlong, Ulong, u64);
scalar_getter!(Isar_Stats_MemberGetDouble, Double, f64);

/// # Safety
///
/// `member` must be null or an element of a live member array.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Isar_Stats_MemberGetString(member_ptr: *const c_void) -> *const c_char {
    unsafe { member(member_ptr) }.and_then(|view| view.string.as_ref()).map_or(ptr::null(), |value| value.as_ptr())
}

macro_rules! array_getter {
    ($name:ident, $variant:ident, $ty:ty) => {
        /// # Safety
        ///
        /// `member` must be null or an element of a live member array;
        /// `length` must be null or writable.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $name(member_ptr: *const c_void, length: *mut usize) -> *mut $ty {
            match unsafe { member(member_ptr) }.and_then(|view| view.member.value()) {
                Some(StatsValue::$variant(values)) => {
                    unsafe { write_len(length, values.len()) };
                    values.as_ptr().cast_mut()
                }
                _ => {
                    unsafe { write_len(length, 0) };
                    ptr::null_mut()
                }
            }
        }
    };
}

array_getter!(Isar_Stats_MemberGetBoolArray, BoolArray, bool);
array_getter!(Isar_Stats_MemberGetIntArray, IntArray, i32);
array_getter!(Isar_Stats_MemberGetUintArray, UintArray, u32);
array_getter!(Isar_Stats_MemberGetLongArray, LongArray, i64);
array_getter!(Isar_Stats_MemberGetUlongArray, UlongArray, u64);
array_getter!(Isar_Stats_MemberGetDoubleArray, DoubleArray, f64);

/// # Safety
///
/// `member` must be null or an element of a live member array; `length`
/// must be null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn Isar_Stats_MemberGetStringArray(
    member_ptr: *const c_void,
    length: *mut usize,
) -> *mut *const c_char {
    match unsafe { member(member_ptr) } {
        Some(view) if matches!(view.member.value(), Some(StatsValue::StringArray(_))) => {
            debug_assert_eq!(view.strings.len(), view.string_ptrs.len());
            unsafe { write_len(length, view.string_ptrs.len()) };
            view.string_ptrs.as_ptr().cast_mut()
        }
        _ => {
            unsafe { write_len(length, 0) };
            ptr::null_mut()
        }
    }
}

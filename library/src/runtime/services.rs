//! C library services exported to programs
//!
//! Every function has the eight-argument ABI signature and runs on the
//! privileged side of an ABI call, with the caller's pointers passed in as
//! plain addresses. The malloc family allocates from the heap of the
//! current process (see [`super::set_current`]).

use core::cmp::Ordering;
use core::ptr;

use super::abi::AbiFn;
use super::heap::UserHeap;

/// Run `f` on the current process heap; zero when there is none
fn with_heap(f: impl FnOnce(&mut UserHeap) -> usize) -> usize {
    let ctx = super::current();
    if ctx.is_null() {
        return 0;
    }
    let heap = unsafe { (*ctx).user_heap() };
    if heap.is_null() {
        log::warn!("Process {} has no heap", unsafe { (*ctx).pid() });
        return 0;
    }
    f(unsafe { &mut *heap })
}

unsafe extern "C" fn malloc(size: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    with_heap(|heap| heap.malloc(size))
}

unsafe extern "C" fn calloc(count: usize, size: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    with_heap(|heap| heap.calloc(count, size))
}

unsafe extern "C" fn realloc(ptr: usize, size: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    with_heap(|heap| heap.realloc(ptr, size))
}

unsafe extern "C" fn free(ptr: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    with_heap(|heap| {
        heap.free(ptr);
        0
    })
}

/// C `int` result in a register
fn int(value: i32) -> usize {
    value as isize as usize
}

fn sign(ordering: Ordering) -> usize {
    int(ordering as i32)
}

unsafe fn c_strlen(s: *const u8) -> usize {
    let mut len = 0;
    while *s.add(len) != 0 {
        len += 1;
    }
    len
}

/// Compare at most `limit` bytes of two strings
unsafe fn c_strcmp(a: *const u8, b: *const u8, limit: usize) -> Ordering {
    for i in 0..limit {
        let (x, y) = (*a.add(i), *b.add(i));
        if x != y || x == 0 {
            return x.cmp(&y);
        }
    }
    Ordering::Equal
}

unsafe extern "C" fn memcpy(dst: usize, src: usize, n: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, n);
    dst
}

unsafe extern "C" fn memmove(dst: usize, src: usize, n: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    ptr::copy(src as *const u8, dst as *mut u8, n);
    dst
}

unsafe extern "C" fn memset(dst: usize, c: usize, n: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    ptr::write_bytes(dst as *mut u8, c as u8, n);
    dst
}

unsafe extern "C" fn memcmp(a: usize, b: usize, n: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    let a = core::slice::from_raw_parts(a as *const u8, n);
    let b = core::slice::from_raw_parts(b as *const u8, n);
    sign(a.cmp(b))
}

unsafe extern "C" fn strlen(s: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    c_strlen(s as *const u8)
}

unsafe extern "C" fn strcmp(a: usize, b: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    sign(c_strcmp(a as *const u8, b as *const u8, usize::MAX))
}

unsafe extern "C" fn strncmp(a: usize, b: usize, n: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    sign(c_strcmp(a as *const u8, b as *const u8, n))
}

unsafe extern "C" fn strcpy(dst: usize, src: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    let len = c_strlen(src as *const u8);
    ptr::copy(src as *const u8, dst as *mut u8, len + 1);
    dst
}

/// Copies at most `n` bytes and pads the rest of `dst` with zeros
unsafe extern "C" fn strncpy(dst: usize, src: usize, n: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    let src = src as *const u8;
    let dst_ptr = dst as *mut u8;
    let mut i = 0;
    while i < n && *src.add(i) != 0 {
        *dst_ptr.add(i) = *src.add(i);
        i += 1;
    }
    ptr::write_bytes(dst_ptr.add(i), 0, n - i);
    dst
}

/// The terminator counts as part of the string
unsafe extern "C" fn strchr(s: usize, c: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    let p = s as *const u8;
    let len = c_strlen(p);
    (0..=len).find(|&i| *p.add(i) == c as u8).map_or(0, |i| s + i)
}

unsafe extern "C" fn strrchr(s: usize, c: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    let p = s as *const u8;
    let len = c_strlen(p);
    (0..=len).rev().find(|&i| *p.add(i) == c as u8).map_or(0, |i| s + i)
}

/// Parse a C `long`; returns the value and the bytes consumed, or zero
/// consumed when no digits were found. Saturates on overflow.
unsafe fn parse_long(s: *const u8, base: u32) -> (isize, usize) {
    let at = |i: usize| *s.add(i);
    let mut i = 0;
    while matches!(at(i), b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c) {
        i += 1;
    }
    let negative = at(i) == b'-';
    if matches!(at(i), b'+' | b'-') {
        i += 1;
    }

    let hex_prefix = at(i) == b'0' && matches!(at(i + 1), b'x' | b'X') && at(i + 2).is_ascii_hexdigit();
    let base = match base {
        0 | 16 if hex_prefix => {
            i += 2;
            16
        }
        0 if at(i) == b'0' => 8,
        0 => 10,
        base => base,
    };
    if !(2..=36).contains(&base) {
        return (0, 0);
    }

    let start = i;
    let mut value: isize = 0;
    let mut overflow = false;
    while let Some(digit) = (at(i) as char).to_digit(base) {
        let next = value.checked_mul(base as isize).and_then(|v| {
            if negative {
                v.checked_sub(digit as isize)
            } else {
                v.checked_add(digit as isize)
            }
        });
        match next {
            Some(v) => value = v,
            None => overflow = true,
        }
        i += 1;
    }
    if i == start {
        return (0, 0);
    }
    if overflow {
        value = if negative { isize::MIN } else { isize::MAX };
    }
    (value, i)
}

unsafe extern "C" fn strtol(s: usize, end: usize, base: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    let (value, consumed) = parse_long(s as *const u8, base as u32);
    if end != 0 {
        (end as *mut usize).write(s + consumed);
    }
    value as usize
}

unsafe extern "C" fn atoi(s: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    int(parse_long(s as *const u8, 10).0 as i32)
}

unsafe extern "C" fn abs(n: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    int((n as i32).wrapping_abs())
}

/// Services that need nothing from the platform
pub const EXPORTS: &[(&str, AbiFn)] = &[
    ("malloc", malloc),
    ("calloc", calloc),
    ("realloc", realloc),
    ("free", free),
    ("memcpy", memcpy),
    ("memmove", memmove),
    ("memset", memset),
    ("memcmp", memcmp),
    ("strlen", strlen),
    ("strcmp", strcmp),
    ("strncmp", strncmp),
    ("strcpy", strcpy),
    ("strncpy", strncpy),
    ("strchr", strchr),
    ("strrchr", strrchr),
    ("strtol", strtol),
    ("atoi", atoi),
    ("abs", abs),
];

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str) -> AbiFn {
        EXPORTS.iter().find(|(n, _)| *n == name).map(|(_, f)| *f).unwrap()
    }

    fn call(name: &str, a: usize, b: usize, c: usize) -> usize {
        unsafe { service(name)(a, b, c, 0, 0, 0, 0, 0) }
    }

    fn addr(bytes: &[u8]) -> usize {
        bytes.as_ptr() as usize
    }

    fn as_int(value: usize) -> i32 {
        value as isize as i32
    }

    #[test]
    fn test_export_names_are_unique() {
        for (i, (name, _)) in EXPORTS.iter().enumerate() {
            assert!(EXPORTS[i + 1..].iter().all(|(other, _)| other != name), "{} exported twice", name);
        }
    }

    #[test]
    fn test_memory_functions() {
        let src = *b"abcdefgh";
        let mut dst = [0u8; 8];
        assert_eq!(call("memcpy", dst.as_mut_ptr() as usize, addr(&src), 8), dst.as_ptr() as usize);
        assert_eq!(&dst, b"abcdefgh");

        // Overlapping move to the right
        call("memmove", dst.as_mut_ptr() as usize + 2, dst.as_ptr() as usize, 6);
        assert_eq!(&dst, b"ababcdef");

        call("memset", dst.as_mut_ptr() as usize, b'z' as usize, 3);
        assert_eq!(&dst, b"zzzbcdef");

        assert_eq!(call("memcmp", addr(b"abc"), addr(b"abd"), 3), int(-1));
        assert_eq!(call("memcmp", addr(b"abc"), addr(b"abd"), 2), 0);
        assert_eq!(call("memcmp", addr(b"b"), addr(b"a"), 1), 1);
    }

    #[test]
    fn test_string_compare() {
        assert_eq!(call("strlen", addr(b"hello\0"), 0, 0), 5);
        assert_eq!(call("strlen", addr(b"\0"), 0, 0), 0);
        assert_eq!(call("strcmp", addr(b"abc\0"), addr(b"abc\0"), 0), 0);
        assert_eq!(as_int(call("strcmp", addr(b"ab\0"), addr(b"abc\0"), 0)), -1);
        assert_eq!(as_int(call("strcmp", addr(b"b\0"), addr(b"abc\0"), 0)), 1);
        assert_eq!(call("strncmp", addr(b"abcx\0"), addr(b"abcy\0"), 3), 0);
        assert_eq!(as_int(call("strncmp", addr(b"abcx\0"), addr(b"abcy\0"), 4)), -1);
    }

    #[test]
    fn test_string_copy() {
        let mut dst = [0xffu8; 8];
        call("strcpy", dst.as_mut_ptr() as usize, addr(b"hi\0"), 0);
        assert_eq!(&dst[..4], b"hi\0\xff");

        let mut dst = [0xffu8; 6];
        call("strncpy", dst.as_mut_ptr() as usize, addr(b"abc\0"), 5);
        assert_eq!(&dst, b"abc\0\0\xff");
        call("strncpy", dst.as_mut_ptr() as usize, addr(b"wxyz\0"), 2);
        assert_eq!(&dst[..3], b"wxc");
    }

    #[test]
    fn test_string_search() {
        let s = b"a/b/c\0";
        assert_eq!(call("strchr", addr(s), b'/' as usize, 0), addr(s) + 1);
        assert_eq!(call("strrchr", addr(s), b'/' as usize, 0), addr(s) + 3);
        assert_eq!(call("strchr", addr(s), 0, 0), addr(s) + 5);
        assert_eq!(call("strchr", addr(s), b'x' as usize, 0), 0);
        assert_eq!(call("strrchr", addr(s), b'x' as usize, 0), 0);
    }

    #[test]
    fn test_number_parsing() {
        let mut end = 0usize;
        let end_ptr = &mut end as *mut usize as usize;

        let s = b"  -42xyz\0";
        assert_eq!(call("strtol", addr(s), end_ptr, 10) as isize, -42);
        assert_eq!(end, addr(s) + 5);

        assert_eq!(call("strtol", addr(b"0x1f\0"), 0, 0), 31);
        assert_eq!(call("strtol", addr(b"0x1f\0"), 0, 16), 31);
        assert_eq!(call("strtol", addr(b"017\0"), 0, 0), 15);
        assert_eq!(call("strtol", addr(b"z\0"), 0, 36), 35);

        let s = b"nope\0";
        assert_eq!(call("strtol", addr(s), end_ptr, 10), 0);
        assert_eq!(end, addr(s));

        assert_eq!(call("strtol", addr(b"99999999999999999999999\0"), 0, 10) as isize, isize::MAX);
        assert_eq!(call("strtol", addr(b"-99999999999999999999999\0"), 0, 10) as isize, isize::MIN);

        assert_eq!(as_int(call("atoi", addr(b"+123\0"), 0, 0)), 123);
        assert_eq!(as_int(call("atoi", addr(b"-7 apples\0"), 0, 0)), -7);
        assert_eq!(as_int(call("abs", int(-5), 0, 0)), 5);
        assert_eq!(as_int(call("abs", int(i32::MIN), 0, 0)), i32::MIN);
    }
}

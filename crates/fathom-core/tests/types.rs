//! Tests for platform-agnostic types

use fathom_core::types::{Address, ProcessId, SourceLocation, StopReason, ThreadId};

#[test]
fn test_process_id_round_trip()
{
    let pid = ProcessId::from(12345);
    assert_eq!(pid.0, 12345);
    let value: u32 = pid.into();
    assert_eq!(value, 12345);
    assert_eq!(pid.to_string(), "12345");
}

#[test]
fn test_process_id_equality()
{
    let pid1 = ProcessId::from(12345);
    let pid2 = ProcessId::from(12345);
    let pid3 = ProcessId::from(54321);

    assert_eq!(pid1, pid2);
    assert_ne!(pid1, pid3);
}

#[test]
fn test_thread_id_ordering()
{
    let mut threads = vec![ThreadId::from(300), ThreadId::from(100), ThreadId::from(200)];
    threads.sort();
    assert_eq!(threads.iter().map(ThreadId::raw).collect::<Vec<_>>(), vec![100, 200, 300]);
}

#[test]
fn test_address_arithmetic()
{
    let base = Address::new(0x7fff_0010);
    assert_eq!(base + 8, Address::new(0x7fff_0018));
    assert_eq!(base.offset(-24), Address::new(0x7ffe_fff8));
    assert_eq!(Address::new(u64::MAX).checked_add(1), None);
    assert!(Address::NULL.is_null());
    assert!(!base.is_null());
}

#[test]
fn test_address_display_is_zero_padded()
{
    assert_eq!(Address::NULL.to_string(), "0x0000000000000000");
    assert_eq!(Address::new(0x4004d6).to_string(), "0x00000000004004d6");
    assert_eq!(format!("{:#x}", Address::new(0x10)), "0x10");
}

#[test]
fn test_stop_reason_liveness()
{
    assert!(StopReason::Breakpoint(0x401000).is_alive());
    assert!(StopReason::Signal(11).is_alive());
    assert!(!StopReason::Exited(0).is_alive());
    assert!(!StopReason::Terminated(9).is_alive());
    assert_eq!(StopReason::Exited(3).to_string(), "exited with status = 3");
}

#[test]
fn test_source_location_parse()
{
    let loc = SourceLocation::parse("src/anonymous/main.c:25").unwrap();
    assert_eq!(loc, SourceLocation::new("src/anonymous/main.c", 25));
    assert_eq!(loc.to_string(), "src/anonymous/main.c:25");

    assert!(SourceLocation::parse("main.c").is_none());
    assert!(SourceLocation::parse("main.c:0").is_none());
    assert!(SourceLocation::parse(":12").is_none());
    assert!(SourceLocation::parse("main.c:twelve").is_none());
}

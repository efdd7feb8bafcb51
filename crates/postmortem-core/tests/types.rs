//! Tests for platform-agnostic types

use postmortem_core::types::{file_name, Address, ModuleEntry, ProcessId, ThreadId};

#[test]
fn test_process_id_from_u32()
{
    let pid = ProcessId::from(12345);
    assert_eq!(pid.0, 12345);
    let value: u32 = pid.into();
    assert_eq!(value, 12345);
}

#[test]
fn test_thread_id_display_is_eight_hex_digits()
{
    assert_eq!(ThreadId::from(0x1a2b).to_string(), "00001a2b");
    assert_eq!(ThreadId::from(0x1_2345_6789).to_string(), "123456789");
}

#[test]
fn test_address_arithmetic()
{
    let addr = Address::from(0x1000);
    assert_eq!((addr + 0x10).value(), 0x1010);
    assert_eq!((addr - 1).value(), 0x0fff);
    assert_eq!(Address::ZERO - 1, Address::new(u64::MAX));
    assert!(Address::ZERO.is_zero());
}

#[test]
fn test_address_formats_as_pointer()
{
    let addr = Address::new(0xdead_beef);
    assert_eq!(addr.to_string(), "0x00000000deadbeef");
    assert_eq!(format!("0x{addr:016X}"), "0x00000000DEADBEEF");
}

#[test]
fn test_module_entry_name_and_range()
{
    let module = ModuleEntry::new(ProcessId(1), Address::new(0x40_0000), 0x1000, "/opt/app/bin/render");

    assert_eq!(module.name, "render");
    assert!(module.contains(Address::new(0x40_0000)));
    assert!(module.contains(Address::new(0x40_0fff)));
    assert!(!module.contains(Address::new(0x40_1000)));
    assert!(!module.contains(Address::new(0x3f_ffff)));
}

#[test]
fn test_file_name_strips_directories()
{
    assert_eq!(file_name("/usr/lib/libc.so.6".as_ref()), "libc.so.6");
    assert_eq!(file_name("render".as_ref()), "render");
}

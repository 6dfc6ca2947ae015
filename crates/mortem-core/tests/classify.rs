//! Cross-platform fault classification

use mortem_core::classify::classify;
use mortem_core::types::{Address, FaultKind, NativeFault, Platform, StopReason};

fn null_deref(platform: Platform) -> NativeFault
{
    match platform {
        Platform::Darwin => NativeFault::MachException {
            exception: 1,
            codes: [1, 0],
        },
        Platform::Windows => NativeFault::Win32Exception {
            code: 0xC000_0005,
            address: Some(Address::ZERO),
        },
        _ => NativeFault::Signal {
            number: 11,
            address: Some(Address::ZERO),
        },
    }
}

#[test]
fn test_null_dereference_is_a_bad_access_everywhere()
{
    for platform in [
        Platform::Darwin,
        Platform::Linux,
        Platform::Windows,
        Platform::Android,
        Platform::FreeBSD,
    ] {
        let result = classify(platform, &null_deref(platform));
        assert!(result.is_classified(), "{platform}");
        assert!(result.reason.is_crash(), "{platform}");
        assert_eq!(result.reason.fault_kind(), Some(FaultKind::Segv), "{platform}");
    }
}

#[test]
fn test_descriptions_follow_platform_conventions()
{
    assert_eq!(classify(Platform::Linux, &null_deref(Platform::Linux)).description, "signal SIGSEGV");
    assert_eq!(
        classify(Platform::Darwin, &null_deref(Platform::Darwin)).description,
        "EXC_BAD_ACCESS (code=1, address=0x0)"
    );
    assert_eq!(
        classify(Platform::Windows, &null_deref(Platform::Windows)).description,
        "invalid address"
    );
}

#[test]
fn test_darwin_soft_signal_carries_the_signal()
{
    let abort = NativeFault::MachException {
        exception: 5,
        codes: [0x10003, 6],
    };
    assert_eq!(
        classify(Platform::Darwin, &abort).reason,
        StopReason::signal(6, FaultKind::Unknown)
    );
}

#[test]
fn test_foreign_fault_shapes_fail_cleanly()
{
    let failures = [
        (Platform::Linux, null_deref(Platform::Darwin)),
        (Platform::Windows, null_deref(Platform::Linux)),
        (Platform::Darwin, null_deref(Platform::Windows)),
        (
            Platform::Linux,
            NativeFault::Signal {
                number: 0,
                address: None,
            },
        ),
    ];
    for (platform, fault) in failures {
        let result = classify(platform, &fault);
        assert_eq!(result.reason, StopReason::None, "{platform}: {fault}");
        let failure = result.failure.unwrap();
        assert_eq!(failure.platform, platform);
        assert_eq!(failure.fault, fault);
    }
}

//! Finite-buffer ("n-sample") acquisition against the simulated FPGA.
//!
//! | Test | Description |
//! |------|-------------|
//! | `test_zero_samples_reads_nothing` | 0 samples returns empty groups and issues no FIFO read |
//! | `test_maximum_request_uses_minimum_chunks` | 10 000 samples drain in one max-sized chunk |
//! | `test_multi_channel_chunking` | 3 channels x 10 000 samples drain in three max-sized chunks |
//! | `test_two_banks_return_two_groups` | A0 + B1 x 100 returns two groups of 100 |
//! | `test_samples_deinterleave_in_slot_order` | Groups follow request order, not slot order |
//! | `test_rejects_out_of_bound_requests` | Rate and count bounds fail before arming |
//! | `test_arm_sequence` | Arm, reset, count, drain, disarm in that order |
//! | `test_per_chunk_timeout` | A FIFO slower than the configured chunk timeout fails |

use std::sync::Arc;
use std::time::Duration;

use daq_driver_elvis::{
    AiChannelSpec, AiRange, Bank, Call, ElvisDevice, ElvisError, EngineConfig, MockTransport, Timeout,
};

// =============================================================================
// Helpers
// =============================================================================

fn setup() -> (Arc<MockTransport>, ElvisDevice) {
    let mock = Arc::new(MockTransport::new());
    let device = ElvisDevice::new(mock.clone());
    (mock, device)
}

/// Volts of a synthetic ramp element on a ±10 V channel.
fn ramp_volts(slot: i32, scan: i32) -> f64 {
    f64::from(slot * 1000 + scan) / 32_768.0 * 10.0
}

// =============================================================================
// Draining
// =============================================================================

#[test]
fn test_zero_samples_reads_nothing() {
    let (mock, device) = setup();
    let mut input = device
        .open_input(&[AiChannelSpec::new(Bank::A, 0), AiChannelSpec::new(Bank::A, 1)])
        .unwrap();

    let groups = input.read_samples(0, 1_000.0).unwrap();
    assert_eq!(groups, vec![Vec::<f64>::new(), Vec::new()]);
    assert!(mock.fifo_reads("AI.A.DMA").is_empty());
}

#[test]
fn test_maximum_request_uses_minimum_chunks() {
    let (mock, device) = setup();
    let mut input = device.open_input(&[AiChannelSpec::new(Bank::B, 5)]).unwrap();

    let groups = input.read_samples(10_000, 100_000.0).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].len(), 10_000);
    assert_eq!(mock.fifo_reads("AI.B.DMA"), vec![10_000]);
}

#[test]
fn test_multi_channel_chunking() {
    let (mock, device) = setup();
    let mut input = device
        .open_input(&[
            AiChannelSpec::new(Bank::A, 0),
            AiChannelSpec::new(Bank::A, 1),
            AiChannelSpec::new(Bank::A, 2),
        ])
        .unwrap();

    let groups = input.read_samples(10_000, 10_000.0).unwrap();
    assert!(groups.iter().all(|g| g.len() == 10_000));
    assert_eq!(mock.fifo_reads("AI.A.DMA"), vec![10_000, 10_000, 10_000]);
}

#[test]
fn test_two_banks_return_two_groups() {
    let (_mock, device) = setup();
    let mut input = device
        .open_input(&[AiChannelSpec::new(Bank::A, 0), AiChannelSpec::new(Bank::B, 1)])
        .unwrap();

    let groups = input.read_samples(100, 1_000.0).unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].len(), 100);
    assert_eq!(groups[1].len(), 100);
}

#[test]
fn test_samples_deinterleave_in_slot_order() {
    let (_mock, device) = setup();
    // Slot 0 holds AI5, slot 1 holds AI2 (±5 V)
    let mut input = device
        .open_input(&[
            AiChannelSpec::new(Bank::A, 5),
            AiChannelSpec::new(Bank::A, 2).range(AiRange::PlusMinus5V),
        ])
        .unwrap();

    let groups = input.read_samples(4, 1_000.0).unwrap();
    for scan in 0..4 {
        assert!((groups[0][scan as usize] - ramp_volts(0, scan)).abs() < 1e-9);
        assert!((groups[1][scan as usize] - ramp_volts(1, scan) / 2.0).abs() < 1e-9);
    }
}

#[test]
fn test_rejects_out_of_bound_requests() {
    let (mock, device) = setup();
    let mut single = device.open_input(&[AiChannelSpec::new(Bank::A, 0)]).unwrap();
    let mut pair = device
        .open_input(&[AiChannelSpec::new(Bank::A, 0), AiChannelSpec::new(Bank::B, 0)])
        .unwrap();

    assert!(single.read_samples(10, 1_000_000.0).is_ok());
    mock.clear_calls();

    let err = single.read_samples(10_001, 1_000.0).unwrap_err();
    assert!(matches!(err, ElvisError::InvalidParameter { .. }));
    let err = pair.read_samples(10, 600_000.0).unwrap_err();
    assert!(matches!(err, ElvisError::InvalidParameter { .. }));
    assert!(single.read_samples(10, 0.0).is_err());

    assert!(!mock
        .calls()
        .iter()
        .any(|c| matches!(c, Call::WriteRegister(..) | Call::WriteArray(..))));
}

#[test]
fn test_arm_sequence() {
    let (mock, device) = setup();
    let mut input = device.open_input(&[AiChannelSpec::new(Bank::A, 3)]).unwrap();
    input.read_samples(8, 2_000.0).unwrap();

    let calls = mock.calls();
    let find = |wanted: &Call| calls.iter().position(|c| c == wanted).unwrap();

    let gate_open = find(&Call::WriteRegister("AI.A.DMA_ENA".into(), 1));
    let clock = find(&Call::WriteRegister("AI.A.CNTR".into(), 20_000));
    let start = find(&Call::FifoStart("AI.A.DMA".into()));
    let stop = find(&Call::FifoStop("AI.A.DMA".into()));
    let count = find(&Call::WriteRegister("AI.A.CNT".into(), 1));
    let drain = find(&Call::FifoRead("AI.A.DMA".into(), 8));
    let gate_close = find(&Call::WriteRegister("AI.A.DMA_ENA".into(), 0));

    assert!(clock < start && gate_open < start);
    assert!(start < stop && stop < count);
    assert!(count < drain && drain < gate_close);
    assert_eq!(mock.register("AI.A.CNT"), 0);
}

#[test]
fn test_per_chunk_timeout() {
    let mock = Arc::new(MockTransport::new());
    let config = EngineConfig {
        n_sample_timeout_ms: Timeout::After(Duration::from_millis(5)),
        ..EngineConfig::default()
    };
    let device = ElvisDevice::with_config(mock.clone(), config).unwrap();
    mock.set_read_delay("AI.B.DMA", Duration::from_millis(50));

    let mut input = device.open_input(&[AiChannelSpec::new(Bank::B, 0)]).unwrap();
    let err = input.read_samples(10, 1_000.0).unwrap_err();
    assert!(matches!(err, ElvisError::AcquisitionTimeout { bank: Bank::B, .. }));
}

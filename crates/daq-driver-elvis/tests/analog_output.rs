//! Analog output n-sample and continuous generation against the simulated
//! FPGA.
//!
//! | Test | Description |
//! |------|-------------|
//! | `test_n_sample_interleaves_in_channel_order` | AO0 precedes AO1 in the FIFO regardless of request order |
//! | `test_n_sample_backpressure` | Writes shrink to the reported headroom and survive stalls |
//! | `test_missing_done_interrupt_times_out` | A generation that never reports done is a `GenerationTimeout` |
//! | `test_dma_system_not_ready` | The system-ready wait is bounded |
//! | `test_rejects_malformed_payloads` | Payload checks run before the hardware is touched |
//! | `test_continuous_preload_then_gate` | The gate opens only after the preload |
//! | `test_continuous_write_checks` | `NotStarted` and `BufferOverrun` before each write |
//! | `test_sync_start_both_banks` | Both gates open before the shared trigger |
//! | `test_write_checks_every_bank_first` | An underflow on the second bank blocks writes to the first |

use std::sync::Arc;
use std::time::Duration;

use daq_driver_elvis::channel::volts_to_code;
use daq_driver_elvis::{AoChannelSpec, Bank, Call, ElvisDevice, ElvisError, EngineConfig, MockTransport, Timeout};

fn setup() -> (Arc<MockTransport>, ElvisDevice) {
    let mock = Arc::new(MockTransport::new());
    let device = ElvisDevice::new(mock.clone());
    (mock, device)
}

fn codes(values: &[f64]) -> Vec<i32> {
    values.iter().map(|&v| i32::from(volts_to_code(v))).collect()
}

// =============================================================================
// N-sample
// =============================================================================

#[test]
fn test_n_sample_interleaves_in_channel_order() {
    let (mock, device) = setup();
    let mut output = device
        .open_output(&[AoChannelSpec::new(Bank::A, 1), AoChannelSpec::new(Bank::A, 0)])
        .unwrap();

    let ao1 = vec![1.0, 2.0, 3.0];
    let ao0 = vec![-1.0, -2.0, -3.0];
    output.write_samples(&[ao1.clone(), ao0.clone()], 10_000.0).unwrap();

    let (c0, c1) = (codes(&ao0), codes(&ao1));
    assert_eq!(
        mock.fifo_written("AO.A.DMA"),
        vec![c0[0], c1[0], c0[1], c1[1], c0[2], c1[2]]
    );

    let calls = mock.calls();
    let gate = calls
        .iter()
        .position(|c| *c == Call::WriteRegister("AO.A.DMA_ENA".into(), 0b11))
        .unwrap();
    let counter = calls
        .iter()
        .position(|c| *c == Call::WriteRegister("AO.A.DMA_CNTR".into(), 4_000))
        .unwrap();
    let payload = calls
        .iter()
        .position(|c| *c == Call::FifoWrite("AO.A.DMA".into(), 6))
        .unwrap();
    let ack = calls
        .iter()
        .position(|c| *c == Call::AcknowledgeInterrupt(31))
        .unwrap();
    assert!(gate < counter && counter < payload && payload < ack);
    assert_eq!(mock.register("AO.A.DMA_ENA"), 0);
}

#[test]
fn test_n_sample_backpressure() {
    let (mock, device) = setup();
    mock.script_headroom("AO.B.DMA", vec![4_000, 0, 0, 6_000]);
    let mut output = device.open_output(&[AoChannelSpec::new(Bank::B, 0)]).unwrap();

    let row: Vec<f64> = (0..10_000).map(|i| f64::from(i % 20) / 2.0 - 5.0).collect();
    output.write_samples(&[row.clone()], 100_000.0).unwrap();

    assert_eq!(mock.fifo_payload_writes("AO.B.DMA"), vec![4_000, 5_000, 1_000]);
    assert_eq!(mock.fifo_written("AO.B.DMA"), codes(&row));
    assert!(mock.calls().contains(&Call::AcknowledgeInterrupt(30)));
}

#[test]
fn test_missing_done_interrupt_times_out() {
    let mock = Arc::new(MockTransport::new());
    let config = EngineConfig {
        generation_timeout_ms: Timeout::After(Duration::from_millis(10)),
        ..EngineConfig::default()
    };
    let device = ElvisDevice::with_config(mock.clone(), config).unwrap();
    mock.set_interrupt(31, false);

    let mut output = device.open_output(&[AoChannelSpec::new(Bank::A, 0)]).unwrap();
    let err = output.write_samples(&[vec![0.5; 100]], 1_000.0).unwrap_err();
    assert!(matches!(err, ElvisError::GenerationTimeout { bank: Bank::A, .. }));
    assert!(!mock.calls().contains(&Call::AcknowledgeInterrupt(31)));
}

#[test]
fn test_dma_system_not_ready() {
    let mock = Arc::new(MockTransport::new());
    let config = EngineConfig {
        idle_timeout_ms: 10,
        ..EngineConfig::default()
    };
    let device = ElvisDevice::with_config(mock.clone(), config).unwrap();
    mock.set_register("DMA.SYS.RDY", 0);

    let mut output = device.open_output(&[AoChannelSpec::new(Bank::B, 1)]).unwrap();
    let err = output.write_samples(&[vec![0.0; 10]], 1_000.0).unwrap_err();
    assert!(err.is_timeout());
    assert!(mock.fifo_written("AO.B.DMA").is_empty());
}

#[test]
fn test_rejects_malformed_payloads() {
    let (mock, device) = setup();
    let mut output = device
        .open_output(&[AoChannelSpec::new(Bank::A, 0), AoChannelSpec::new(Bank::B, 0)])
        .unwrap();

    assert!(output.write_samples(&[vec![0.0; 10]], 1_000.0).is_err());
    assert!(output.write_samples(&[vec![0.0; 10], vec![0.0; 9]], 1_000.0).is_err());
    assert!(output.write_samples(&[vec![0.0; 10], vec![0.0; 10]], 500.0).is_err());
    assert!(output.write_samples(&[vec![0.0; 10_001], vec![0.0; 10_001]], 1_000.0).is_err());
    assert!(output.write_samples(&[vec![f64::INFINITY], vec![0.0]], 1_000.0).is_err());
    assert!(mock.calls().is_empty());
}

// =============================================================================
// Continuous
// =============================================================================

#[test]
fn test_continuous_preload_then_gate() {
    let (mock, device) = setup();
    let mut output = device.open_output(&[AoChannelSpec::new(Bank::A, 1)]).unwrap();

    output
        .start_continuous(&[vec![1.0; 500]], 50_000.0, Timeout::Infinite)
        .unwrap();
    let calls = mock.calls();
    let preload = calls
        .iter()
        .position(|c| *c == Call::FifoWrite("AO.A.DMA".into(), 500))
        .unwrap();
    let gate = calls
        .iter()
        .rposition(|c| *c == Call::WriteRegister("AO.A.DMA_ENA".into(), 0b10))
        .unwrap();
    assert!(preload < gate);

    output
        .write_continuous(&[vec![-1.0; 200]], Timeout::After(Duration::from_millis(50)))
        .unwrap();
    assert_eq!(mock.fifo_payload_writes("AO.A.DMA"), vec![500, 200]);

    output.stop_continuous().unwrap();
    assert_eq!(mock.register("AO.A.DMA_ENA"), 0);
}

#[test]
fn test_continuous_write_checks() {
    let (mock, device) = setup();
    let mut output = device.open_output(&[AoChannelSpec::new(Bank::B, 0)]).unwrap();
    output
        .start_continuous(&[vec![0.0; 100]], 1_000.0, Timeout::Infinite)
        .unwrap();

    mock.set_register("AO.B.DMA_UNDR", 1);
    let err = output
        .write_continuous(&[vec![0.0; 100]], Timeout::Infinite)
        .unwrap_err();
    assert!(matches!(err, ElvisError::BufferOverrun { bank: Bank::B }));

    mock.set_register("AO.B.DMA_UNDR", 0);
    mock.set_register("AO.B.DMA_ENA", 0);
    let err = output
        .write_continuous(&[vec![0.0; 100]], Timeout::Infinite)
        .unwrap_err();
    assert!(matches!(err, ElvisError::NotStarted { bank: Bank::B }));

    output.close().unwrap();
    let mut again = device.open_output(&[AoChannelSpec::new(Bank::B, 0)]).unwrap();
    again
        .start_continuous(&[vec![0.0; 100]], 1_000.0, Timeout::Infinite)
        .unwrap();
}

#[test]
fn test_sync_start_both_banks() {
    let (mock, device) = setup();
    let mut output = device
        .open_output(&[AoChannelSpec::new(Bank::B, 0), AoChannelSpec::new(Bank::A, 0)])
        .unwrap();
    output
        .start_continuous(&[vec![0.0; 50], vec![0.0; 50]], 2_000.0, Timeout::Infinite)
        .unwrap();

    let calls = mock.calls();
    let trigger = calls
        .iter()
        .position(|c| *c == Call::WriteRegister("SYNC".into(), 1))
        .unwrap();
    for bank in ["A", "B"] {
        let gate = calls
            .iter()
            .rposition(|c| *c == Call::WriteRegister(format!("AO.{bank}.DMA_ENA"), 0b01))
            .unwrap();
        let preload = calls
            .iter()
            .position(|c| *c == Call::FifoWrite(format!("AO.{bank}.DMA"), 50))
            .unwrap();
        assert!(preload < gate && gate < trigger);
    }

    output.stop_continuous().unwrap();
    assert_eq!(mock.register("A.SYNC"), 0);
    assert_eq!(mock.register("B.SYNC"), 0);
}

#[test]
fn test_write_checks_every_bank_first() {
    let (mock, device) = setup();
    let mut output = device
        .open_output(&[AoChannelSpec::new(Bank::A, 0), AoChannelSpec::new(Bank::B, 0)])
        .unwrap();
    output
        .start_continuous(&[vec![0.0; 50], vec![0.0; 50]], 2_000.0, Timeout::Infinite)
        .unwrap();

    mock.set_register("AO.B.DMA_UNDR", 1);
    let err = output
        .write_continuous(&[vec![1.0; 20], vec![1.0; 20]], Timeout::Infinite)
        .unwrap_err();
    assert!(matches!(err, ElvisError::BufferOverrun { bank: Bank::B }));
    assert_eq!(mock.fifo_payload_writes("AO.A.DMA"), vec![50]);
}

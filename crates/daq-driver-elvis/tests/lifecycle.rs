//! Shared per-bank DMA handles across sessions.
//!
//! | Test | Description |
//! |------|-------------|
//! | `test_last_n_sample_closer_releases_fifo` | The FIFO survives until the last n-sample session closes |
//! | `test_fifo_is_opened_once_per_bank` | Sessions on one bank share a single FIFO |
//! | `test_continuous_outlives_n_sample_users` | Releasing n-sample users leaves a running stream alone |
//! | `test_drop_stops_stream` | Dropping a streaming session frees the bank |
//! | `test_directions_are_independent` | Input and output streams on one bank do not collide |
//! | `test_sessions_on_separate_threads` | Banks can be driven concurrently |

use std::sync::Arc;
use std::thread;

use daq_driver_elvis::{
    AiChannelSpec, AoChannelSpec, Bank, Direction, ElvisDevice, MockTransport, SessionMode, Timeout,
};

fn setup() -> (Arc<MockTransport>, ElvisDevice) {
    let mock = Arc::new(MockTransport::new());
    let device = ElvisDevice::new(mock.clone());
    (mock, device)
}

#[test]
fn test_last_n_sample_closer_releases_fifo() {
    let (_mock, device) = setup();
    let mut first = device.open_input(&[AiChannelSpec::new(Bank::A, 0)]).unwrap();
    let mut second = device.open_input(&[AiChannelSpec::new(Bank::A, 1)]).unwrap();

    first.read_samples(10, 1_000.0).unwrap();
    second.read_samples(10, 1_000.0).unwrap();
    let state = device.bank_state(Direction::Input, Bank::A);
    assert_eq!(state.n_sample_users, 2);
    assert!(state.fifo.is_some());

    first.close().unwrap();
    assert!(device.bank_state(Direction::Input, Bank::A).fifo.is_some());

    drop(second);
    let state = device.bank_state(Direction::Input, Bank::A);
    assert_eq!(state.n_sample_users, 0);
    assert!(state.fifo.is_none());
}

#[test]
fn test_fifo_is_opened_once_per_bank() {
    let (mock, device) = setup();
    let mut first = device.open_input(&[AiChannelSpec::new(Bank::B, 0)]).unwrap();
    let mut second = device.open_input(&[AiChannelSpec::new(Bank::B, 2)]).unwrap();

    first.read_samples(10, 1_000.0).unwrap();
    second.read_samples(10, 1_000.0).unwrap();
    first.read_samples(10, 1_000.0).unwrap();
    assert_eq!(mock.open_count("AI.B.DMA"), 1);
}

#[test]
fn test_continuous_outlives_n_sample_users() {
    let (_mock, device) = setup();
    let mut finite = device.open_input(&[AiChannelSpec::new(Bank::A, 0)]).unwrap();
    let mut stream = device.open_input(&[AiChannelSpec::new(Bank::A, 5)]).unwrap();

    finite.read_samples(10, 1_000.0).unwrap();
    stream.start_continuous(1_000.0).unwrap();
    finite.close().unwrap();

    let state = device.bank_state(Direction::Input, Bank::A);
    assert!(state.continuous);
    assert!(state.fifo.is_some());
    assert_eq!(stream.read_continuous(10, Timeout::Infinite).unwrap()[0].len(), 10);

    stream.stop_continuous().unwrap();
    assert!(device.bank_state(Direction::Input, Bank::A).fifo.is_none());
}

#[test]
fn test_drop_stops_stream() {
    let (mock, device) = setup();
    {
        let mut input = device.open_input(&[AiChannelSpec::new(Bank::B, 1)]).unwrap();
        input.start_continuous(2_000.0).unwrap();
        assert_eq!(input.mode(), SessionMode::Continuous);
    }
    assert!(!device.bank_state(Direction::Input, Bank::B).continuous);
    assert_eq!(mock.register("AI.B.DMA_ENA"), 0);

    {
        let mut output = device.open_output(&[AoChannelSpec::new(Bank::B, 1)]).unwrap();
        output
            .start_continuous(&[vec![0.0; 10]], 1_000.0, Timeout::Infinite)
            .unwrap();
    }
    assert!(!device.bank_state(Direction::Output, Bank::B).continuous);

    let mut again = device.open_input(&[AiChannelSpec::new(Bank::B, 1)]).unwrap();
    again.start_continuous(2_000.0).unwrap();
}

#[test]
fn test_directions_are_independent() {
    let (_mock, device) = setup();
    let mut input = device.open_input(&[AiChannelSpec::new(Bank::A, 0)]).unwrap();
    let mut output = device.open_output(&[AoChannelSpec::new(Bank::A, 0)]).unwrap();

    input.start_continuous(1_000.0).unwrap();
    output
        .start_continuous(&[vec![0.0; 10]], 1_000.0, Timeout::Infinite)
        .unwrap();
    assert!(device.bank_state(Direction::Input, Bank::A).continuous);
    assert!(device.bank_state(Direction::Output, Bank::A).continuous);
}

#[test]
fn test_sessions_on_separate_threads() {
    let (_mock, device) = setup();
    let handles: Vec<_> = Bank::ALL
        .into_iter()
        .map(|bank| {
            let device = device.clone();
            thread::spawn(move || {
                let mut input = device.open_input(&[AiChannelSpec::new(bank, 0)]).unwrap();
                for _ in 0..5 {
                    let groups = input.read_samples(100, 10_000.0).unwrap();
                    assert_eq!(groups[0].len(), 100);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    for bank in Bank::ALL {
        assert!(device.bank_state(Direction::Input, bank).fifo.is_none());
    }
}

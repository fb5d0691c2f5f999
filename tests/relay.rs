use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use padlink::hid::ControllerState;
use padlink::transport::{NullTransport, SerialTransport, Transport};
use padlink::Relay;

#[test]
fn null_transport_relays_every_state() {
    let states = [
        ControllerState::new(0, 8, [127, 127, 127, 127]),
        ControllerState::new(1, 0, [127, 127, 127, 127]),
    ];

    let mut transport = NullTransport::with_interval(Duration::from_millis(1));
    transport.open().unwrap();
    for state in &states {
        assert!(transport.poll().unwrap());
        transport.write(state).unwrap();
    }
    assert!(transport.poll().unwrap());
    transport.close().unwrap();
    assert_eq!(transport.discarded(), 2);

    let mut relay = Relay::new(NullTransport::with_interval(Duration::from_millis(1)));
    let stats = relay.run(states).unwrap();
    assert_eq!(stats.sent, 2);
    assert_eq!(stats.not_ready, 0);
}

/// Bridge stand-in: hands out scripted status bytes, then times out
struct Bridge {
    inbound: VecDeque<u8>,
    outbound: Arc<Mutex<Vec<u8>>>,
}

impl Read for Bridge {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inbound.pop_front() {
            Some(byte) => {
                buf[0] = byte;
                Ok(1)
            }
            None => Err(io::Error::new(ErrorKind::TimedOut, "timed out")),
        }
    }
}

impl Write for Bridge {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbound.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn bridge(inbound: &[u8]) -> (SerialTransport, Arc<Mutex<Vec<u8>>>) {
    let outbound = Arc::new(Mutex::new(Vec::new()));
    let link = Bridge {
        inbound: inbound.iter().copied().collect(),
        outbound: outbound.clone(),
    };
    (SerialTransport::with_link("bridge", Box::new(link)), outbound)
}

#[test]
fn serial_ready_overrun_ready() {
    let (mut transport, _) = bridge(b"SOS");
    transport.open().unwrap();

    let results: Vec<bool> = (0..3).map(|_| transport.poll().unwrap()).collect();
    assert_eq!(results, vec![true, false, true]);
    assert_eq!(transport.stats().overruns, 1);
}

#[test]
fn serial_relay_writes_hex_lines() {
    let (transport, outbound) = bridge(b"SRSR");
    let mut relay = Relay::new(transport);

    let states = [
        ControllerState::default(),
        ControllerState::new(0x2000, 2, [0, 255, 128, 128]),
    ];
    let stats = relay.run(states).unwrap();
    assert_eq!(stats.sent, 2);

    assert_eq!(
        outbound.lock().unwrap().as_slice(),
        b"0000087f7f7f7f\n00200200ff8080\n"
    );
}

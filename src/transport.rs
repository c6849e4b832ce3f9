use crate::error::Result;
use crate::protocol::Frame;

/// A synchronous full-duplex link to the first device of the chain.
///
/// `transfer` clocks out `buffer` and overwrites it in place with the bytes clocked in.
pub trait Transport: Send {
    fn transfer(&mut self, buffer: &mut [u8]) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn transfer(&mut self, buffer: &mut [u8]) -> Result<()> {
        (**self).transfer(buffer)
    }
}

/// Sends a frame to the chain and leaves the response in the frame.
///
/// The isoSPI interface needs time between chip select going low and the first clock
/// edge, which is more than the SPI peripheral allows for. One dummy byte per device is
/// exchanged first to wake every port in the chain; without it frames get corrupted
/// intermittently. Errors on the dummy bytes are only logged, errors on the frame itself
/// are returned unchanged.
pub fn send_frame<T: Transport + ?Sized>(transport: &mut T, frame: &mut Frame) -> Result<()> {
    for device in 0..frame.devices() {
        let mut dummy = [0u8; 1];
        if let Err(err) = transport.transfer(&mut dummy) {
            log::warn!("Wake-up byte {device} failed: {err}");
        }
    }
    log::trace!("send_frame: {frame:?}");
    transport.transfer(frame.as_mut_bytes())?;
    log::trace!("receive_frame: {frame:?}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::commands;

    #[derive(Default)]
    struct Recorder {
        transfers: Vec<Vec<u8>>,
        fail_frames: bool,
    }

    impl Transport for Recorder {
        fn transfer(&mut self, buffer: &mut [u8]) -> Result<()> {
            self.transfers.push(buffer.to_vec());
            if self.fail_frames && buffer.len() > 1 {
                return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "stuck").into());
            }
            buffer.iter_mut().for_each(|b| *b = !*b);
            Ok(())
        }
    }

    #[test]
    fn one_wake_up_byte_per_device_precedes_the_frame() {
        let mut recorder = Recorder::default();
        let mut frame = Frame::new(3);
        frame.set_command(commands::RDCVA);
        let sent = frame.as_bytes().to_vec();
        send_frame(&mut recorder, &mut frame).unwrap();

        assert_eq!(recorder.transfers.len(), 4);
        assert!(recorder.transfers[..3].iter().all(|t| t == &[0u8]));
        assert_eq!(recorder.transfers[3], sent);
        // the response replaces the request in place
        assert_eq!(frame.as_bytes()[0], !sent[0]);
    }

    #[test]
    fn frame_errors_propagate_untouched() {
        let mut recorder = Recorder {
            fail_frames: true,
            ..Default::default()
        };
        let mut frame = Frame::new(2);
        match send_frame(&mut recorder, &mut frame) {
            Err(Error::Io(err)) => assert_eq!(err.kind(), std::io::ErrorKind::TimedOut),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(recorder.transfers.len(), 3);
    }
}

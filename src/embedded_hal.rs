//! `embedded_hal` trait impls.

use crate::os::{InterruptController, Kernel};
use crate::{Can, Data, ExtendedId, Fifo, Frame, Id, StandardId, TransferError};

use embedded_can as can;

/// A blocking transmit/receive channel over one receive FIFO.
///
/// Obtained from [`Can::channel`]; transmission is shared with every
/// other user of the device, reception drains the selected FIFO.
pub struct Channel<'a, K: Kernel, N: InterruptController> {
    pub(crate) can: &'a Can<K, N>,
    pub(crate) fifo: Fifo,
}

impl<K, N> can::blocking::Can for Channel<'_, K, N>
where
    K: Kernel,
    N: InterruptController,
{
    type Frame = Frame;

    type Error = TransferError;

    fn transmit(&mut self, frame: &Self::Frame) -> Result<(), Self::Error> {
        if self.can.transmit(frame) {
            Ok(())
        } else {
            Err(TransferError)
        }
    }

    fn receive(&mut self) -> Result<Self::Frame, Self::Error> {
        let mut frame = Frame::new_data(StandardId::ZERO, Data::empty());
        if self.can.receive(&mut frame, self.fifo) {
            Ok(frame)
        } else {
            Err(TransferError)
        }
    }
}

impl can::Error for TransferError {
    fn kind(&self) -> can::ErrorKind {
        can::ErrorKind::Other
    }
}

impl can::Frame for Frame {
    fn new(id: impl Into<can::Id>, data: &[u8]) -> Option<Self> {
        let id = match id.into() {
            can::Id::Standard(id) => unsafe {
                Id::Standard(StandardId::new_unchecked(id.as_raw()))
            },
            can::Id::Extended(id) => unsafe {
                Id::Extended(ExtendedId::new_unchecked(id.as_raw()))
            },
        };

        let data = Data::new(data)?;
        Some(Frame::new_data(id, data))
    }

    fn new_remote(id: impl Into<can::Id>, dlc: usize) -> Option<Self> {
        let id = match id.into() {
            can::Id::Standard(id) => unsafe {
                Id::Standard(StandardId::new_unchecked(id.as_raw()))
            },
            can::Id::Extended(id) => unsafe {
                Id::Extended(ExtendedId::new_unchecked(id.as_raw()))
            },
        };

        if dlc <= 8 {
            Frame::new_remote(id, dlc as u8)
        } else {
            None
        }
    }

    #[inline]
    fn is_extended(&self) -> bool {
        self.is_extended()
    }

    #[inline]
    fn is_remote_frame(&self) -> bool {
        self.is_remote_frame()
    }

    #[inline]
    fn id(&self) -> can::Id {
        match self.id() {
            Id::Standard(id) => unsafe {
                can::Id::Standard(can::StandardId::new_unchecked(id.as_raw()))
            },
            Id::Extended(id) => unsafe {
                can::Id::Extended(can::ExtendedId::new_unchecked(id.as_raw()))
            },
        }
    }

    #[inline]
    fn dlc(&self) -> usize {
        self.dlc().into()
    }

    fn data(&self) -> &[u8] {
        if let Some(data) = self.data() {
            data
        } else {
            &[]
        }
    }
}

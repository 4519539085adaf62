//! Trait abstraction for the modem's serial byte stream to enable testing

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Byte-stream operations the modem driver needs from its port
#[async_trait]
pub trait ModemPort: Send {
    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;

    /// Read whatever is available into `buf`; `Ok(0)` means the port closed
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Wrapper around tokio_serial::SerialStream that implements ModemPort
pub struct TokioSerialPort {
    port: tokio_serial::SerialStream,
}

impl TokioSerialPort {
    pub fn new(port: tokio_serial::SerialStream) -> Self {
        Self { port }
    }
}

#[async_trait]
impl ModemPort for TokioSerialPort {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.port.flush().await
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf).await
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Mock modem port for testing
    ///
    /// Reads are served from a script of chunks. Once the script runs out,
    /// reads never complete, like an idle serial line.
    #[derive(Clone)]
    pub struct MockModemPort {
        pub written_data: Arc<Mutex<Vec<Vec<u8>>>>,
        pub read_script: Arc<Mutex<VecDeque<io::Result<Vec<u8>>>>>,
        pub write_error: Arc<Mutex<Option<io::ErrorKind>>>,
    }

    impl MockModemPort {
        pub fn new() -> Self {
            Self {
                written_data: Arc::new(Mutex::new(Vec::new())),
                read_script: Arc::new(Mutex::new(VecDeque::new())),
                write_error: Arc::new(Mutex::new(None)),
            }
        }

        /// Queue bytes to be returned by the next read
        pub fn push_read(&self, data: &[u8]) {
            self.read_script.lock().unwrap().push_back(Ok(data.to_vec()));
        }

        /// Queue a read failure
        pub fn push_read_error(&self, error: io::ErrorKind) {
            self.read_script
                .lock()
                .unwrap()
                .push_back(Err(io::Error::new(error, "Mock read error")));
        }

        /// Queue an end-of-stream
        pub fn push_eof(&self) {
            self.read_script.lock().unwrap().push_back(Ok(Vec::new()));
        }

        pub fn get_written_data(&self) -> Vec<Vec<u8>> {
            self.written_data.lock().unwrap().clone()
        }

        /// Everything written so far, as text
        pub fn written_text(&self) -> String {
            self.get_written_data()
                .iter()
                .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                .collect()
        }

        pub fn set_write_error(&self, error: io::ErrorKind) {
            *self.write_error.lock().unwrap() = Some(error);
        }
    }

    #[async_trait]
    impl ModemPort for MockModemPort {
        async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            if let Some(error) = *self.write_error.lock().unwrap() {
                return Err(io::Error::new(error, "Mock write error"));
            }
            self.written_data.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let next = self.read_script.lock().unwrap().pop_front();
            match next {
                Some(Ok(mut data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        let rest = data.split_off(n);
                        self.read_script.lock().unwrap().push_front(Ok(rest));
                    }
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => std::future::pending().await,
            }
        }
    }
}

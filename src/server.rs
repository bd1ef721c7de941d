use std::{fs::File, io::{self, BufReader}, net::SocketAddr, path::{Path, PathBuf}, sync::Arc, time::Duration};
use rustls_pemfile::{certs, pkcs8_private_keys};
use tokio::{net::{TcpListener, TcpStream, ToSocketAddrs}, task::JoinHandle, time};
use tokio_rustls::{rustls::{pki_types::{CertificateDer, PrivateKeyDer}, ServerConfig}, TlsAcceptor};
use tracing::{error, info};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

pub struct Server<W> {
    cert: Option<CertificatePath>,
    wire: W,
}

impl<W> Server<W>
    where W: Wire + Send + Sync + 'static
{
    pub fn new(wire: W, cert: Option<CertificatePath>) -> Self {
        Self { cert, wire }
    }

    /// Bind the listener up front so a bind failure reaches the caller,
    /// then accept on a background task for the rest of the process.
    pub async fn bind<A>(
        self,
        addr: A
    ) -> io::Result<(SocketAddr, JoinHandle<io::Result<()>>)>
        where A: ToSocketAddrs
    {
        let tls = match &self.cert {
            Some(cert) => Some(TlsAcceptor::from(Arc::new(cert.server_config()?))),
            None => None,
        };

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, tls = tls.is_some(), "[server] listening");

        let join_handle = tokio::spawn(Self::accept_loop(listener, self.wire, tls));
        Ok((local_addr, join_handle))
    }

    async fn accept_loop(listener: TcpListener, wire: W, tls: Option<TlsAcceptor>) -> io::Result<()> {
        let wire = Arc::new(wire);
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(v) => v,
                Err(err) => {
                    error!("[server] accept: {}", err);
                    time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            let wire = Arc::clone(&wire);
            match tls.clone() {
                Some(acceptor) => {
                    tokio::spawn(async move { wire.connect_with_tls(stream, peer_addr, acceptor).await });
                }
                None => wire.connect(stream, peer_addr).await,
            }
        }
    }
}

pub struct CertificatePath {
    cert: PathBuf,
    private_key: PathBuf
}

impl CertificatePath {
    pub fn new(cert: impl AsRef<Path>, private_key: impl AsRef<Path>) -> Self {
        let cert = cert.as_ref().to_owned();
        let private_key = private_key.as_ref().to_owned();
        CertificatePath { cert, private_key }
    }

    fn server_config(&self) -> io::Result<ServerConfig> {
        let certs = self.load_certs()?;
        let key = self.load_keys()?;

        ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))
    }

    fn load_certs(&self) -> io::Result<Vec<CertificateDer<'static>>> {
        certs(&mut BufReader::new(File::open(&self.cert)?)).collect()
    }

    fn load_keys(&self) -> io::Result<PrivateKeyDer<'static>> {
        pkcs8_private_keys(&mut BufReader::new(File::open(&self.private_key)?))
            .next()
            .ok_or_else(|| io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("no pkcs8 private key in {}", self.private_key.display())
            ))?
            .map(Into::into)
    }
}

pub trait Wire {
    fn connect_with_tls(&self, stream: TcpStream, addr: SocketAddr, tls: TlsAcceptor) -> impl std::future::Future<Output = ()> + Send;
    fn connect(&self, stream: TcpStream, addr: SocketAddr) -> impl std::future::Future<Output = ()> + Send;
}

/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::net::SocketAddr;
use std::sync::Mutex as StdMutex;

use log::debug;
use tokio::sync::mpsc;

use crate::config::{FtpClientConfig, FtpSecureMode};
use crate::connection::FtpConnectionProvider;
use crate::control::{
    spawn_control, FtpCommand, FtpControlHandle, FtpReply, FtpTransferType,
};
use crate::error::{FtpCommandError, FtpConnectError, FtpSessionOpenError, FtpTlsError};
use crate::event::FtpEvent;
use crate::feature::{FtpCommandSupport, FtpServerFeature};
use crate::transfer::FtpTlsContext;

/// How far the control channel got with TLS; a reconnect must not
/// repeat AUTH once the channel was upgraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtpTlsStage {
    Clear,
    UpgradedTls,
    UpgradedSsl,
}

pub(crate) struct FtpSession {
    pub(crate) handle: FtpControlHandle,
    pub(crate) feature: FtpServerFeature,
    pub(crate) support: StdMutex<FtpCommandSupport>,
    pub(crate) control_peer: SocketAddr,
    pub(crate) tls: Option<FtpTlsContext>,
    pub(crate) tls_stage: FtpTlsStage,
    pub(crate) welcome: String,
}

impl std::fmt::Debug for FtpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpSession").finish_non_exhaustive()
    }
}

/// Issue one command and wait for its terminating reply, bounded by the
/// configured command timeout.
pub(crate) async fn run_command(
    handle: &FtpControlHandle,
    config: &FtpClientConfig,
    cmd: &FtpCommand,
    promote: bool,
) -> Result<FtpReply, FtpCommandError> {
    let replies = handle.send(cmd, promote);
    match tokio::time::timeout(config.control.command_timeout, replies.terminating()).await {
        Ok(r) => r,
        Err(_) => Err(FtpCommandError::ReplyTimedOut(cmd.verb())),
    }
}

/// Drive the connection state machine to `ready`: greeting, the optional
/// TLS upgrade, login, feature discovery and binary type negotiation.
pub(crate) async fn open_session(
    config: &FtpClientConfig,
    provider: &mut dyn FtpConnectionProvider,
    events: mpsc::UnboundedSender<FtpEvent>,
) -> Result<FtpSession, FtpConnectError> {
    let tls = match config.secure {
        FtpSecureMode::Plain => None,
        _ => {
            let tls_config = config.tls.as_ref().ok_or(FtpTlsError::NoClientConfig)?;
            Some(FtpTlsContext::build(tls_config, &config.host)?)
        }
    };

    let (stream, control_peer) = match tokio::time::timeout(
        config.connect_timeout,
        provider.new_control_connection(&config.host, config.port),
    )
    .await
    {
        Ok(Ok(r)) => r,
        Ok(Err(e)) => return Err(FtpConnectError::ConnectIoError(e)),
        Err(_) => return Err(FtpConnectError::ConnectTimedOut),
    };

    // implicit mode handshakes before the greeting and skips AUTH
    let mut tls_stage = FtpTlsStage::Clear;
    let stream = if config.secure == FtpSecureMode::Implicit {
        let tls = tls.as_ref().expect("tls context for implicit mode");
        tls_stage = FtpTlsStage::UpgradedTls;
        tls.wrap(stream).await?
    } else {
        stream
    };

    let (handle, greeting_rx) = spawn_control(
        stream,
        config.control,
        config.keepalive,
        events.clone(),
    );

    let greeting = match tokio::time::timeout(config.connect_timeout, greeting_rx).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(_)) => {
            return Err(FtpConnectError::GreetingFailed(
                FtpCommandError::SessionClosed,
            ))
        }
        Err(_) => return Err(FtpConnectError::GreetingTimedOut),
    };
    match greeting.code {
        code if code / 100 == 2 => {}
        421 => return Err(FtpConnectError::ServiceNotAvailable),
        code => {
            return Err(FtpConnectError::GreetingFailed(
                FtpCommandError::from_reply(code, greeting.text),
            ))
        }
    }
    let welcome = greeting.text;

    if matches!(
        config.secure,
        FtpSecureMode::Explicit | FtpSecureMode::ControlOnly
    ) {
        let tls = tls.as_ref().expect("tls context for explicit mode");
        tls_stage = upgrade_control(&handle, config, tls).await?;
    }

    login(&handle, config).await?;

    let (feature, support) = discover_features(&handle, config).await?;
    if feature.support_utf8_path() {
        // best effort, reply ignored
        let _ = run_command(&handle, config, &FtpCommand::OptsUtf8On, false).await;
    }

    match run_command(&handle, config, &FtpCommand::Type(FtpTransferType::Image), false).await {
        Ok(reply) if reply.group() == 2 => {}
        Ok(reply) => {
            return Err(FtpConnectError::NegotiationFailed(
                FtpCommandError::UnexpectedReplyCode("TYPE", reply.code),
            ))
        }
        Err(e) => return Err(FtpConnectError::NegotiationFailed(e)),
    }

    let _ = events.send(FtpEvent::Ready);

    Ok(FtpSession {
        handle,
        feature,
        support: StdMutex::new(support),
        control_peer,
        tls,
        tls_stage,
        welcome,
    })
}

/// AUTH TLS, falling back to AUTH SSL, then the in-place handshake and
/// PBSZ 0 / PROT P.
async fn upgrade_control(
    handle: &FtpControlHandle,
    config: &FtpClientConfig,
    tls: &FtpTlsContext,
) -> Result<FtpTlsStage, FtpConnectError> {
    let stage = match run_command(handle, config, &FtpCommand::AuthTls, false).await {
        Ok(reply) if reply.code == 234 => FtpTlsStage::UpgradedTls,
        Ok(_) | Err(FtpCommandError::Protocol { .. }) => {
            match run_command(handle, config, &FtpCommand::AuthSsl, false).await {
                Ok(reply) if reply.code == 234 => FtpTlsStage::UpgradedSsl,
                Ok(_) | Err(FtpCommandError::Protocol { .. }) => {
                    return Err(FtpTlsError::NegotiationRejected.into());
                }
                Err(e) => return Err(FtpConnectError::NegotiationFailed(e)),
            }
        }
        Err(e) => return Err(FtpConnectError::NegotiationFailed(e)),
    };

    handle
        .upgrade_tls(tls.connector.clone(), tls.name.clone())
        .await?;
    debug!("control channel upgraded to tls");

    for cmd in [FtpCommand::Pbsz(0), FtpCommand::ProtPrivate] {
        match run_command(handle, config, &cmd, false).await {
            Ok(reply) if reply.code == 200 => {}
            Ok(_) | Err(FtpCommandError::Protocol { .. }) => {
                return Err(FtpTlsError::NegotiationRejected.into());
            }
            Err(e) => return Err(FtpConnectError::NegotiationFailed(e)),
        }
    }
    Ok(stage)
}

async fn login(
    handle: &FtpControlHandle,
    config: &FtpClientConfig,
) -> Result<(), FtpSessionOpenError> {
    let reply = run_command(handle, config, &FtpCommand::User(config.user.clone()), false)
        .await
        .map_err(FtpSessionOpenError::RawCommandError)?;
    match reply.code {
        230 => return Ok(()),
        331 | 332 => {}
        code => {
            return Err(FtpSessionOpenError::RawCommandError(
                FtpCommandError::UnexpectedReplyCode("USER", code),
            ))
        }
    }

    let reply = run_command(
        handle,
        config,
        &FtpCommand::Pass(config.password.clone()),
        false,
    )
    .await
    .map_err(FtpSessionOpenError::RawCommandError)?;
    match reply.code {
        230 => Ok(()),
        332 => Err(FtpSessionOpenError::AccountIsNeeded),
        _ => Err(FtpSessionOpenError::NotLoggedIn),
    }
}

/// FEAT per RFC 2389; 500/502 means an empty feature set, not an error.
/// The configured override map is applied on top.
async fn discover_features(
    handle: &FtpControlHandle,
    config: &FtpClientConfig,
) -> Result<(FtpServerFeature, FtpCommandSupport), FtpConnectError> {
    let mut support = FtpCommandSupport::default();
    let mut feature = match run_command(handle, config, &FtpCommand::Feat, false).await {
        Ok(reply) if reply.group() == 2 => FtpServerFeature::parse_feat_reply(&reply.text),
        Ok(_) => FtpServerFeature::default(),
        Err(e) if e.is_not_implemented() => {
            support.mark_unsupported(FtpCommand::Feat.verb());
            FtpServerFeature::default()
        }
        Err(e) => return Err(FtpConnectError::NegotiationFailed(e)),
    };
    for (name, value) in &config.feature_overrides {
        feature.apply_override(name, value);
    }
    Ok((feature, support))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::BoxFtpStream;
    use async_trait::async_trait;
    use std::io;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    struct InjectedProvider {
        control: Option<BoxFtpStream>,
    }

    #[async_trait]
    impl FtpConnectionProvider for InjectedProvider {
        async fn new_control_connection(
            &mut self,
            _host: &str,
            _port: u16,
        ) -> io::Result<(BoxFtpStream, SocketAddr)> {
            let stream = self.control.take().expect("single control connection");
            Ok((stream, "198.51.100.7:21".parse().unwrap()))
        }

        async fn new_data_connection(&mut self, _peer: SocketAddr) -> io::Result<BoxFtpStream> {
            Err(io::ErrorKind::ConnectionRefused.into())
        }
    }

    async fn expect_line(server: &mut DuplexStream, want: &str) {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            assert!(server.read(&mut byte).await.unwrap() > 0, "client closed");
            line.push(byte[0]);
            if byte[0] == b'\n' {
                break;
            }
        }
        assert_eq!(String::from_utf8(line).unwrap(), format!("{want}\r\n"));
    }

    fn test_config() -> FtpClientConfig {
        FtpClientConfig {
            user: "demo".to_string(),
            password: "secret".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn plain_login_to_ready() {
        let (client_side, mut server) = duplex(4096);
        let mut provider = InjectedProvider { control: Some(Box::new(client_side)) };
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let config = test_config();

        let server_task = tokio::spawn(async move {
            server.write_all(b"220 test server\r\n").await.unwrap();
            expect_line(&mut server, "USER demo").await;
            server.write_all(b"331 need password\r\n").await.unwrap();
            expect_line(&mut server, "PASS secret").await;
            server.write_all(b"230 logged in\r\n").await.unwrap();
            expect_line(&mut server, "FEAT").await;
            server
                .write_all(b"211-Features:\r\n SIZE\r\n UTF8\r\n211 End\r\n")
                .await
                .unwrap();
            expect_line(&mut server, "OPTS UTF8 ON").await;
            server.write_all(b"200 ok\r\n").await.unwrap();
            expect_line(&mut server, "TYPE I").await;
            server.write_all(b"200 binary\r\n").await.unwrap();
            server
        });

        let session = open_session(&config, &mut provider, events_tx)
            .await
            .unwrap();
        assert_eq!(session.welcome, "test server");
        assert!(session.feature.support_file_size());
        assert!(session.feature.support_utf8_path());
        assert_eq!(session.tls_stage, FtpTlsStage::Clear);

        assert_eq!(
            events_rx.recv().await.unwrap(),
            FtpEvent::Greeting("test server".to_string())
        );
        assert_eq!(events_rx.recv().await.unwrap(), FtpEvent::Ready);
        let _server = server_task.await.unwrap();
    }

    #[tokio::test]
    async fn user_230_skips_password() {
        let (client_side, mut server) = duplex(4096);
        let mut provider = InjectedProvider { control: Some(Box::new(client_side)) };
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let config = test_config();

        let server_task = tokio::spawn(async move {
            server.write_all(b"220 hi\r\n").await.unwrap();
            expect_line(&mut server, "USER demo").await;
            server.write_all(b"230 no password needed\r\n").await.unwrap();
            expect_line(&mut server, "FEAT").await;
            server.write_all(b"502 nope\r\n").await.unwrap();
            expect_line(&mut server, "TYPE I").await;
            server.write_all(b"200 binary\r\n").await.unwrap();
            server
        });

        let session = open_session(&config, &mut provider, events_tx)
            .await
            .unwrap();
        assert!(session.feature.is_empty());
        assert!(session.support.lock().unwrap().known_unsupported("FEAT"));
        let _server = server_task.await.unwrap();
    }

    #[tokio::test]
    async fn bad_credentials_reject_with_530() {
        let (client_side, mut server) = duplex(4096);
        let mut provider = InjectedProvider { control: Some(Box::new(client_side)) };
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let config = FtpClientConfig {
            user: "invalid".to_string(),
            password: "invalid".to_string(),
            ..Default::default()
        };

        tokio::spawn(async move {
            server.write_all(b"220 hi\r\n").await.unwrap();
            expect_line(&mut server, "USER invalid").await;
            server.write_all(b"331 password please\r\n").await.unwrap();
            expect_line(&mut server, "PASS invalid").await;
            server.write_all(b"530 login incorrect\r\n").await.unwrap();
            // hold the socket open so the session fails on the reply, not eof
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        });

        let err = open_session(&config, &mut provider, events_tx)
            .await
            .unwrap_err();
        match err {
            FtpConnectError::SessionOpenFailed(FtpSessionOpenError::RawCommandError(
                FtpCommandError::Protocol { code, .. },
            )) => assert_eq!(code, 530),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn feature_overrides_apply() {
        let (client_side, mut server) = duplex(4096);
        let mut provider = InjectedProvider { control: Some(Box::new(client_side)) };
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let mut config = test_config();
        config.feature_overrides = vec![
            ("EPSV".to_string(), crate::feature::FtpFeatureOverride::Disable),
            ("EPRT".to_string(), crate::feature::FtpFeatureOverride::Enable),
        ];

        let server_task = tokio::spawn(async move {
            server.write_all(b"220 hi\r\n").await.unwrap();
            expect_line(&mut server, "USER demo").await;
            server.write_all(b"230 in\r\n").await.unwrap();
            expect_line(&mut server, "FEAT").await;
            server
                .write_all(b"211-Features:\r\n EPSV\r\n211 End\r\n")
                .await
                .unwrap();
            expect_line(&mut server, "TYPE I").await;
            server.write_all(b"200 binary\r\n").await.unwrap();
            server
        });

        let session = open_session(&config, &mut provider, events_tx)
            .await
            .unwrap();
        assert!(!session.feature.support_epsv());
        assert!(session.feature.support_eprt());
        let _server = server_task.await.unwrap();
    }
}

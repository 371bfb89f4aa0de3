/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtpTransferType {
    Ascii,
    Image,
}

/// A control channel command, rendered to its wire form by [`fmt::Display`].
///
/// The CRLF terminator is appended by the dispatcher when writing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FtpCommand {
    User(String),
    Pass(String),
    AuthTls,
    AuthSsl,
    Pbsz(u32),
    ProtPrivate,
    Feat,
    OptsUtf8On,
    Type(FtpTransferType),
    Mode(char),
    Noop,
    Quit,
    Rein,
    Pwd,
    Cwd(String),
    Cdup,
    Mkd(String),
    Rmd(String),
    Dele(String),
    Size(String),
    Mdtm(String),
    Mlst(String),
    Mlsd(Option<String>),
    List(Option<String>),
    Nlst(Option<String>),
    Retr(String),
    Stor(String),
    Appe(String),
    Rest(u64),
    Rnfr(String),
    Rnto(String),
    Site(String),
    Stat,
    Syst,
    Abor,
    Pasv,
    Epsv,
    Port(Ipv4Addr, u16),
    Eprt(SocketAddr),
}

impl FtpCommand {
    /// The bare command verb, used in error messages.
    pub fn verb(&self) -> &'static str {
        match self {
            FtpCommand::User(_) => "USER",
            FtpCommand::Pass(_) => "PASS",
            FtpCommand::AuthTls | FtpCommand::AuthSsl => "AUTH",
            FtpCommand::Pbsz(_) => "PBSZ",
            FtpCommand::ProtPrivate => "PROT",
            FtpCommand::Feat => "FEAT",
            FtpCommand::OptsUtf8On => "OPTS",
            FtpCommand::Type(_) => "TYPE",
            FtpCommand::Mode(_) => "MODE",
            FtpCommand::Noop => "NOOP",
            FtpCommand::Quit => "QUIT",
            FtpCommand::Rein => "REIN",
            FtpCommand::Pwd => "PWD",
            FtpCommand::Cwd(_) => "CWD",
            FtpCommand::Cdup => "CDUP",
            FtpCommand::Mkd(_) => "MKD",
            FtpCommand::Rmd(_) => "RMD",
            FtpCommand::Dele(_) => "DELE",
            FtpCommand::Size(_) => "SIZE",
            FtpCommand::Mdtm(_) => "MDTM",
            FtpCommand::Mlst(_) => "MLST",
            FtpCommand::Mlsd(_) => "MLSD",
            FtpCommand::List(_) => "LIST",
            FtpCommand::Nlst(_) => "NLST",
            FtpCommand::Retr(_) => "RETR",
            FtpCommand::Stor(_) => "STOR",
            FtpCommand::Appe(_) => "APPE",
            FtpCommand::Rest(_) => "REST",
            FtpCommand::Rnfr(_) => "RNFR",
            FtpCommand::Rnto(_) => "RNTO",
            FtpCommand::Site(_) => "SITE",
            FtpCommand::Stat => "STAT",
            FtpCommand::Syst => "SYST",
            FtpCommand::Abor => "ABOR",
            FtpCommand::Pasv => "PASV",
            FtpCommand::Epsv => "EPSV",
            FtpCommand::Port(_, _) => "PORT",
            FtpCommand::Eprt(_) => "EPRT",
        }
    }

    pub(crate) fn is_abor(&self) -> bool {
        matches!(self, FtpCommand::Abor)
    }
}

impl fmt::Display for FtpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtpCommand::User(name) => write!(f, "USER {name}"),
            FtpCommand::Pass(pass) => write!(f, "PASS {pass}"),
            FtpCommand::AuthTls => f.write_str("AUTH TLS"),
            FtpCommand::AuthSsl => f.write_str("AUTH SSL"),
            FtpCommand::Pbsz(size) => write!(f, "PBSZ {size}"),
            FtpCommand::ProtPrivate => f.write_str("PROT P"),
            FtpCommand::Feat => f.write_str("FEAT"),
            FtpCommand::OptsUtf8On => f.write_str("OPTS UTF8 ON"),
            FtpCommand::Type(FtpTransferType::Ascii) => f.write_str("TYPE A"),
            FtpCommand::Type(FtpTransferType::Image) => f.write_str("TYPE I"),
            FtpCommand::Mode(m) => write!(f, "MODE {m}"),
            FtpCommand::Noop => f.write_str("NOOP"),
            FtpCommand::Quit => f.write_str("QUIT"),
            FtpCommand::Rein => f.write_str("REIN"),
            FtpCommand::Pwd => f.write_str("PWD"),
            FtpCommand::Cwd(path) => write!(f, "CWD {path}"),
            FtpCommand::Cdup => f.write_str("CDUP"),
            FtpCommand::Mkd(path) => write!(f, "MKD {path}"),
            FtpCommand::Rmd(path) => write!(f, "RMD {path}"),
            FtpCommand::Dele(path) => write!(f, "DELE {path}"),
            FtpCommand::Size(path) => write!(f, "SIZE {path}"),
            FtpCommand::Mdtm(path) => write!(f, "MDTM {path}"),
            FtpCommand::Mlst(path) => write!(f, "MLST {path}"),
            FtpCommand::Mlsd(Some(path)) => write!(f, "MLSD {path}"),
            FtpCommand::Mlsd(None) => f.write_str("MLSD"),
            FtpCommand::List(Some(path)) => write!(f, "LIST {path}"),
            FtpCommand::List(None) => f.write_str("LIST"),
            FtpCommand::Nlst(Some(path)) => write!(f, "NLST {path}"),
            FtpCommand::Nlst(None) => f.write_str("NLST"),
            FtpCommand::Retr(path) => write!(f, "RETR {path}"),
            FtpCommand::Stor(path) => write!(f, "STOR {path}"),
            FtpCommand::Appe(path) => write!(f, "APPE {path}"),
            FtpCommand::Rest(offset) => write!(f, "REST {offset}"),
            FtpCommand::Rnfr(path) => write!(f, "RNFR {path}"),
            FtpCommand::Rnto(path) => write!(f, "RNTO {path}"),
            FtpCommand::Site(cmd) => write!(f, "SITE {cmd}"),
            FtpCommand::Stat => f.write_str("STAT"),
            FtpCommand::Syst => f.write_str("SYST"),
            FtpCommand::Abor => f.write_str("ABOR"),
            FtpCommand::Pasv => f.write_str("PASV"),
            FtpCommand::Epsv => f.write_str("EPSV"),
            FtpCommand::Port(ip, port) => {
                let o = ip.octets();
                write!(
                    f,
                    "PORT {},{},{},{},{},{}",
                    o[0],
                    o[1],
                    o[2],
                    o[3],
                    port >> 8,
                    port & 0xff
                )
            }
            FtpCommand::Eprt(addr) => {
                let proto = match addr.ip() {
                    IpAddr::V4(_) => 1,
                    IpAddr::V6(_) => 2,
                };
                write!(f, "EPRT |{}|{}|{}|", proto, addr.ip(), addr.port())
            }
        }
    }
}

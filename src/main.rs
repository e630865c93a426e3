#![cfg(feature = "cli")]
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use base64::Engine;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use log::{info, LevelFilter};

use cryptfile::key::{parse_guid, parse_hex_key};
use cryptfile::playready::{test_server_key_pair, PlayReadyPssh, WrmHeader, WrmVersion, DEFAULT_LA_URL};
use cryptfile::pssh::{AccessPssh, ClearKeyPssh};
use cryptfile::track::NO_ROTATION;
use cryptfile::widevine::WidevinePsshData;
use cryptfile::{
    CryptKey, CryptTrack, CryptfileBuilder, DrmInfoPssh, KeyPair, ProtectionScheme, PsshBox,
    SystemId,
};

#[derive(Parser)]
#[command(name = "cryptfile", version, about = "CENC cryptfile generator")]
struct Cli {
    #[arg(short = 'd', long = "debug", action = ArgAction::SetTrue)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Build a cryptfile with a ClearKey PSSH.
    Clearkey {
        #[command(flatten)]
        tracks: TrackArgs,
        /// Use the DASH-IF ClearKey system ID.
        #[arg(long = "dashif", action = ArgAction::SetTrue)]
        dashif: bool,
    },
    /// Build a cryptfile with an Access PSSH.
    Access {
        #[command(flatten)]
        tracks: TrackArgs,
        /// Also add a ClearKey PSSH.
        #[arg(long = "ck", action = ArgAction::SetTrue)]
        clearkey: bool,
    },
    /// Build a cryptfile with a PlayReady PSSH (one WRM header per key).
    /// Keys left out of a track spec are derived from the test server key seed.
    #[command(disable_version_flag = true)]
    Playready {
        #[command(flatten)]
        tracks: TrackArgs,
        /// License acquisition URL embedded in each WRM header.
        #[arg(short = 'u', long = "url", default_value = DEFAULT_LA_URL)]
        la_url: String,
        /// WRM header version.
        #[arg(long = "version", value_enum, default_value_t = WrmVersionArg::V4000)]
        version: WrmVersionArg,
        /// Also add a ClearKey PSSH.
        #[arg(long = "ck", action = ArgAction::SetTrue)]
        clearkey: bool,
    },
    /// Decode a base64 PSSH box.
    Inspect { pssh: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum WrmVersionArg {
    #[value(name = "4000")]
    V4000,
    #[value(name = "4100")]
    V4100,
}

impl From<WrmVersionArg> for WrmVersion {
    fn from(value: WrmVersionArg) -> Self {
        match value {
            WrmVersionArg::V4000 => WrmVersion::V4_0_0_0,
            WrmVersionArg::V4100 => WrmVersion::V4_1_0_0,
        }
    }
}

#[derive(Args)]
struct TrackArgs {
    /// `<track_id>:<kid>=[<key>][,<kid>=[<key>]...]` or `<track_id>:@<key_file>`.
    /// Key IDs are GUIDs, keys are hex; an omitted key is generated (or
    /// derived, for PlayReady).
    #[arg(required = true)]
    specs: Vec<String>,
    /// Samples encrypted with each key before moving to the next.
    #[arg(short = 'r', long = "roll")]
    roll: Option<u32>,
    /// Use AES-CBC instead of AES-CTR.
    #[arg(long = "cbc", action = ArgAction::SetTrue)]
    cbc: bool,
    #[arg(long = "iv-size", default_value_t = 8)]
    iv_size: u8,
    /// Print DASH ContentProtection elements.
    #[arg(long = "cp", action = ArgAction::SetTrue)]
    cp: bool,
    /// Write the cryptfile here instead of stdout.
    #[arg(short = 'o', long = "out")]
    out: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new().filter_level(level).init();

    match cli.command {
        Commands::Clearkey { tracks, dashif } => {
            let system_id = if dashif {
                SystemId::DashIfClearKey
            } else {
                SystemId::ClearKey
            };
            run_generate(&tracks, KeyPair::with_random_key, |pairs| {
                let pssh = ClearKeyPssh::with_system_id(&system_id.to_bytes(), key_ids(pairs))?;
                Ok(vec![pssh.into()])
            })
        }
        Commands::Access { tracks, clearkey } => {
            run_generate(&tracks, KeyPair::with_random_key, |pairs| {
                let mut list: Vec<DrmInfoPssh> = vec![AccessPssh::new(key_ids(pairs))?.into()];
                if clearkey {
                    list.push(ClearKeyPssh::new(key_ids(pairs))?.into());
                }
                Ok(list)
            })
        }
        Commands::Playready {
            tracks,
            la_url,
            version,
            clearkey,
        } => run_generate(&tracks, test_server_key_pair, |pairs| {
            let headers: Vec<WrmHeader> = pairs
                .iter()
                .map(|pair| {
                    WrmHeader::for_key(pair)
                        .with_version(version.into())
                        .with_la_url(la_url.as_str())
                })
                .collect();
            let mut list: Vec<DrmInfoPssh> = vec![PlayReadyPssh::from_wrm_headers(&headers)?.into()];
            if clearkey {
                list.push(ClearKeyPssh::new(key_ids(pairs))?.into());
            }
            Ok(list)
        }),
        Commands::Inspect { pssh } => run_inspect(&pssh),
    }
}

/// `missing_key` supplies the key for a key ID given without one.
fn run_generate<F>(
    args: &TrackArgs,
    missing_key: fn([u8; 16]) -> KeyPair,
    make_pssh: F,
) -> anyhow::Result<()>
where
    F: FnOnce(&[KeyPair]) -> cryptfile::Result<Vec<DrmInfoPssh>>,
{
    let rolling = args.roll.map_or(NO_ROTATION, i64::from);

    let mut tracks = Vec::new();
    let mut pairs = Vec::new();
    for spec in args.specs.iter() {
        let (track_id, track_pairs) = parse_track_spec(spec, missing_key)?;
        let keys = track_pairs.iter().copied().map(CryptKey::from).collect();
        tracks.push(
            CryptTrack::new(track_id, args.iv_size, None, keys, rolling)
                .with_context(|| format!("Invalid track {}", spec))?,
        );
        pairs.extend(track_pairs);
    }

    info!("[+] Ensure the following keys are available to the client:");
    for pair in pairs.iter() {
        let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        info!(
            "    {} : {} ({} : {})",
            pair.id_hex(),
            pair.key_hex(),
            b64.encode(pair.id()),
            b64.encode(pair.key())
        );
    }

    let pssh_list = make_pssh(&pairs)?;
    let scheme = if args.cbc {
        ProtectionScheme::AesCbc
    } else {
        ProtectionScheme::AesCtr
    };
    let builder = CryptfileBuilder::new(scheme, tracks, pssh_list);

    if args.cp {
        for cp in builder.content_protection()? {
            println!("{}", cp.to_fragment_string()?);
        }
    }

    let doc = builder.build_cryptfile()?;
    match args.out.as_deref() {
        Some(path) => {
            write_document(&doc, path)?;
            info!("[+] Wrote cryptfile to {}", path.display());
        }
        None => println!("{}", doc.to_xml_string()?),
    }
    Ok(())
}

fn write_document(doc: &cryptfile::Document, path: &Path) -> anyhow::Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    doc.write_to(BufWriter::new(file))?;
    Ok(())
}

fn key_ids(pairs: &[KeyPair]) -> Vec<[u8; 16]> {
    pairs.iter().map(|pair| *pair.id()).collect()
}

fn parse_track_spec(
    spec: &str,
    missing_key: fn([u8; 16]) -> KeyPair,
) -> anyhow::Result<(u32, Vec<KeyPair>)> {
    let Some((id, keys)) = spec.split_once(':') else {
        bail!("Illegal track specification: {}", spec);
    };
    let track_id: u32 = id
        .trim()
        .parse()
        .with_context(|| format!("Invalid track ID: {}", id))?;

    let pairs = match keys.strip_prefix('@') {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read key file {}", path))?;
            text.lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| parse_key_pair(line, &[':', '='], missing_key))
                .collect::<anyhow::Result<Vec<_>>>()?
        }
        None => keys
            .split(',')
            .map(|pair| parse_key_pair(pair, &['='], missing_key))
            .collect::<anyhow::Result<Vec<_>>>()?,
    };

    if pairs.is_empty() {
        bail!("No keys for track {}", track_id);
    }
    Ok((track_id, pairs))
}

fn parse_key_pair(
    text: &str,
    separators: &[char],
    missing_key: fn([u8; 16]) -> KeyPair,
) -> anyhow::Result<KeyPair> {
    let (kid, key) = match text.split_once(separators) {
        Some((kid, key)) => (kid, key.trim()),
        None => (text, ""),
    };
    let kid = parse_guid(kid).with_context(|| format!("Illegal keypair: {}", text))?;
    if key.is_empty() {
        return Ok(missing_key(kid));
    }
    let key = parse_hex_key(key).with_context(|| format!("Illegal keypair: {}", text))?;
    Ok(KeyPair::new(kid, key))
}

fn run_inspect(pssh_b64: &str) -> anyhow::Result<()> {
    let pssh = PsshBox::from_base64(pssh_b64).context("Failed to parse PSSH box")?;
    let system = pssh
        .known_system()
        .map_or_else(|| "unknown".to_string(), |s| format!("{:?}", s));

    println!("version:   {}", pssh.version);
    println!("flags:     {:#08x}", pssh.flags);
    println!(
        "system ID: {} ({})",
        cryptfile::key::format_guid(&pssh.system_id),
        system
    );
    for kid in pssh.key_ids.iter() {
        println!("key ID:    {}", cryptfile::key::format_guid(kid));
    }
    println!("data:      {} byte(s)", pssh.data.len());

    match pssh.known_system() {
        Some(SystemId::Widevine) => {
            use prost::Message;
            let data = WidevinePsshData::decode(pssh.data.as_slice())
                .context("Failed to decode WidevinePsshData")?;
            println!("{:#?}", data);
        }
        Some(SystemId::PlayReady) if pssh.data.len() >= 6 => {
            let records = u16::from_le_bytes([pssh.data[4], pssh.data[5]]);
            println!("PlayReady object: {} record(s)", records);
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::{parse_track_spec, Cli, Commands, WrmVersionArg};
    use cryptfile::playready::{test_server_key_pair, WrmVersion, DEFAULT_LA_URL};
    use cryptfile::KeyPair;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn playready_defaults() {
        let cli = Cli::try_parse_from([
            "cryptfile",
            "playready",
            "1:10000000-1000-1000-1000-100000000001",
        ])
        .expect("parse");
        let Commands::Playready { la_url, version, .. } = cli.command else {
            panic!("expected playready");
        };
        assert_eq!(la_url, DEFAULT_LA_URL);
        assert_eq!(WrmVersion::from(version), WrmVersion::V4_0_0_0);
    }

    #[test]
    fn playready_version_4100() {
        let cli = Cli::try_parse_from([
            "cryptfile",
            "playready",
            "--version",
            "4100",
            "-u",
            "https://pr.example/rightsmanager.asmx",
            "1:10000000-1000-1000-1000-100000000001",
        ])
        .expect("parse");
        let Commands::Playready { la_url, version, .. } = cli.command else {
            panic!("expected playready");
        };
        assert_eq!(la_url, "https://pr.example/rightsmanager.asmx");
        assert!(matches!(version, WrmVersionArg::V4100));
        assert_eq!(WrmVersion::from(version), WrmVersion::V4_1_0_0);

        assert!(Cli::try_parse_from(["cryptfile", "playready", "--version", "4200", "1:x"]).is_err());
    }

    #[test]
    fn key_id_only_specs_derive_keys() {
        let (track_id, pairs) = parse_track_spec(
            "2:10000000-1000-1000-1000-100000000001",
            test_server_key_pair,
        )
        .expect("spec");
        assert_eq!(track_id, 2);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].key_hex(), "3a2a1b68dd2bd9b2eeb25e84c4776668");

        let (_, pairs) = parse_track_spec(
            "1:10000000-1000-1000-1000-100000000001=00112233445566778899aabbccddeeff",
            test_server_key_pair,
        )
        .expect("spec");
        assert_eq!(pairs[0].key_hex(), "00112233445566778899aabbccddeeff");

        let (_, pairs) = parse_track_spec(
            "1:10000000-1000-1000-1000-100000000001,10000000-1000-1000-1000-100000000002",
            KeyPair::with_random_key,
        )
        .expect("spec");
        assert_eq!(pairs.len(), 2);
    }
}

//! Identity and signature exchange with the device.
//!
//! ```text
//! ReadIdentity -> RequestSignature -> InstallSignature -> ReadBack -> Verify
//!                                                                      |
//!                                                   Success <----------+----> Rejected
//! ```
//!
//! Installing is attempted once. A device that already holds a signature
//! refuses a second one; that refusal is expected and only logged, the read-back
//! decides whether the unit passes.

use crate::error::{Error, Result};
use crate::oracle::SigningOracle;
use crate::port::Port;
use crate::protocol::cli::SerialCli;
use crate::protocol::identity::IdentityRecord;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use log::{debug, info, trace};

/// Command that prints the identity document, or installs a signature when
/// given one as argument.
pub const IDENTITY_COMMAND: &str = "zubax_id";

/// Step of the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureState {
    /// Reading the identity document.
    ReadIdentity,
    /// Asking the oracle for the signature.
    RequestSignature,
    /// Writing the signature to the device.
    InstallSignature,
    /// Reading the identity document again.
    ReadBack,
    /// Comparing the installed signature with the issued one.
    Verify,
    /// The device holds the issued signature.
    Success,
    /// The exchange failed.
    Rejected,
}

/// Outcome of a successful exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureReport {
    /// Product reported by the firmware.
    pub product_id: Option<String>,
    /// Hardware unique ID.
    pub unique_id: Vec<u8>,
    /// Installed and verified signature.
    pub signature: Vec<u8>,
    /// Whether the oracle had issued this signature before.
    pub reused: bool,
}

impl SignatureReport {
    /// Unique ID as lowercase hex.
    pub fn unique_id_hex(&self) -> String {
        hex::encode(&self.unique_id)
    }

    /// Signature in the encoding used on the device CLI.
    pub fn signature_base64(&self) -> String {
        STANDARD.encode(&self.signature)
    }
}

/// Read and parse the identity document.
pub fn read_identity<P: Port>(cli: &mut SerialCli<P>) -> Result<IdentityRecord> {
    let lines = cli.write_line_and_read_until_timeout(IDENTITY_COMMAND)?;
    IdentityRecord::parse(&lines)
}

/// Drives one unit through the signature exchange.
pub struct SignatureProtocol<'a, O: SigningOracle + ?Sized> {
    oracle: &'a O,
    product: &'a str,
    state: SignatureState,
}

impl<'a, O: SigningOracle + ?Sized> SignatureProtocol<'a, O> {
    /// Exchange for units of `product`, signed by `oracle`.
    pub fn new(oracle: &'a O, product: &'a str) -> Self {
        Self {
            oracle,
            product,
            state: SignatureState::ReadIdentity,
        }
    }

    /// Current step; `Success` or `Rejected` once [`Self::run`] returned.
    pub fn state(&self) -> SignatureState {
        self.state
    }

    /// Run the exchange on an open CLI session.
    pub fn run<P: Port>(&mut self, cli: &mut SerialCli<P>) -> Result<SignatureReport> {
        match self.run_steps(cli) {
            Ok(report) => {
                self.state = SignatureState::Success;
                Ok(report)
            },
            Err(e) => {
                debug!("Signature exchange stopped at {:?}: {e}", self.state);
                self.state = SignatureState::Rejected;
                Err(e)
            },
        }
    }

    fn enter(&mut self, state: SignatureState) {
        trace!("{:?} -> {state:?}", self.state);
        self.state = state;
    }

    fn run_steps<P: Port>(&mut self, cli: &mut SerialCli<P>) -> Result<SignatureReport> {
        self.enter(SignatureState::ReadIdentity);
        let identity = read_identity(cli)?;
        let unique_id = identity.unique_id()?;
        let product_id = identity.product_id().map(str::to_string);
        info!(
            "Device {} with unique ID {}",
            product_id.as_deref().unwrap_or("<unknown product>"),
            hex::encode(&unique_id)
        );

        self.enter(SignatureState::RequestSignature);
        info!("Requesting signature for unique ID {}", hex::encode(&unique_id));
        let issuance = self.oracle.issue(&unique_id, self.product)?;
        if issuance.newly_generated {
            info!("New signature has been generated");
        } else {
            info!("This device has been signed earlier, reusing the existing signature");
        }
        let encoded = STANDARD.encode(&issuance.signature);
        info!("Signature in base64: {encoded}");

        self.enter(SignatureState::InstallSignature);
        if let Err(e) = install(cli, &encoded) {
            debug!("{e} (expected for units signed earlier)");
        }

        self.enter(SignatureState::ReadBack);
        let readback = read_identity(cli)?;
        let installed = match readback.signatures().as_slice() {
            [one] => (*one).to_string(),
            values => {
                return Err(Error::Verification(format!(
                    "expected exactly one installed signature, found {}",
                    values.len()
                )));
            },
        };
        info!("Installed signature in base64: {installed}");

        self.enter(SignatureState::Verify);
        let installed = STANDARD.decode(&installed).map_err(|e| {
            Error::Verification(format!("installed signature is not valid base64: {e}"))
        })?;
        if installed != issuance.signature {
            return Err(Error::Verification(
                "installed signature does not match the issued signature".into(),
            ));
        }

        info!("Signature has been installed and verified");
        Ok(SignatureReport {
            product_id,
            unique_id,
            signature: issuance.signature,
            reused: !issuance.newly_generated,
        })
    }
}

/// Run the exchange with a fresh [`SignatureProtocol`].
pub fn provision_signature<P, O>(
    cli: &mut SerialCli<P>,
    oracle: &O,
    product: &str,
) -> Result<SignatureReport>
where
    P: Port,
    O: SigningOracle + ?Sized,
{
    SignatureProtocol::new(oracle, product).run(cli)
}

fn install<P: Port>(cli: &mut SerialCli<P>, encoded: &str) -> Result<()> {
    let response = cli
        .write_line_and_read_until_timeout(&format!("{IDENTITY_COMMAND} {encoded}"))
        .map_err(|e| Error::SignatureInstallRejected(e.to_string()))?;
    debug!("Signature installation response: {response:?}");

    let refused = response.iter().find(|line| {
        let lower = line.to_ascii_lowercase();
        lower.contains("error") || lower.contains("fail") || lower.contains("denied")
    });
    match refused {
        Some(line) => Err(Error::SignatureInstallRejected(line.clone())),
        None => Ok(()),
    }
}

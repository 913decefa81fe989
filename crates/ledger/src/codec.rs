//! Invoice encoding.
//!
//! The ledger treats invoice strings as opaque; [`InvoiceCodec`] is where the
//! node's encode/decode primitives plug in. [`RgbInvoiceCodec`] handles the
//! plain `rgb:` URI shape:
//!
//! ```text
//! rgb:<asset|~>/<amount|~>/<network>:<recipient_id>?expiry=<unix>&endpoints=<e1>,<e2>
//! ```

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{LedgerError, ResultLedger};

const SCHEME: &str = "rgb:";
const ANY: &str = "~";

/// The fields an invoice carries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceData {
    pub recipient_id: String,
    pub asset_id: Option<String>,
    pub amount: Option<u64>,
    pub expiration_timestamp: Option<DateTime<Utc>>,
    pub transport_endpoints: Vec<String>,
}

pub trait InvoiceCodec: fmt::Debug + Send + Sync {
    fn encode(&self, data: &InvoiceData) -> ResultLedger<String>;
    fn decode(&self, invoice: &str) -> ResultLedger<InvoiceData>;
}

/// Codec for `rgb:` URIs bound to one Bitcoin network.
#[derive(Clone, Debug)]
pub struct RgbInvoiceCodec {
    network: String,
}

impl RgbInvoiceCodec {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
        }
    }
}

impl Default for RgbInvoiceCodec {
    fn default() -> Self {
        Self::new("bc")
    }
}

fn invalid(invoice: &str, reason: &str) -> LedgerError {
    LedgerError::InvalidInvoice(format!("{reason}: {invoice}"))
}

impl InvoiceCodec for RgbInvoiceCodec {
    fn encode(&self, data: &InvoiceData) -> ResultLedger<String> {
        if data.recipient_id.is_empty() {
            return Err(LedgerError::InvalidInvoice(
                "recipient_id must not be empty".to_string(),
            ));
        }
        if let Some(asset_id) = &data.asset_id
            && (asset_id.contains('/') || asset_id.contains('?'))
        {
            return Err(LedgerError::InvalidInvoice(format!(
                "asset id not encodable: {asset_id}"
            )));
        }
        if data.transport_endpoints.iter().any(|e| e.contains(',') || e.contains('&')) {
            return Err(LedgerError::InvalidInvoice(
                "transport endpoint not encodable".to_string(),
            ));
        }

        let asset = data.asset_id.as_deref().unwrap_or(ANY);
        let amount = data
            .amount
            .map_or_else(|| ANY.to_string(), |a| a.to_string());
        let mut uri = format!(
            "{SCHEME}{asset}/{amount}/{}:{}",
            self.network, data.recipient_id
        );

        let mut params: Vec<String> = Vec::new();
        if let Some(expiry) = data.expiration_timestamp {
            params.push(format!("expiry={}", expiry.timestamp()));
        }
        if !data.transport_endpoints.is_empty() {
            params.push(format!("endpoints={}", data.transport_endpoints.join(",")));
        }
        if !params.is_empty() {
            uri.push('?');
            uri.push_str(&params.join("&"));
        }
        Ok(uri)
    }

    fn decode(&self, invoice: &str) -> ResultLedger<InvoiceData> {
        let body = invoice
            .strip_prefix(SCHEME)
            .ok_or_else(|| invalid(invoice, "missing rgb: scheme"))?;
        let (path, query) = match body.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (body, None),
        };

        let mut parts = path.splitn(3, '/');
        let (Some(asset), Some(amount), Some(recipient)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid(invoice, "expected asset/amount/recipient"));
        };

        let asset_id = match asset {
            "" => return Err(invalid(invoice, "empty asset")),
            ANY => None,
            other => Some(other.to_string()),
        };
        let amount = match amount {
            ANY => None,
            other => Some(
                other
                    .parse::<u64>()
                    .map_err(|_| invalid(invoice, "invalid amount"))?,
            ),
        };
        let (network, recipient_id) = recipient
            .split_once(':')
            .ok_or_else(|| invalid(invoice, "missing network"))?;
        if network != self.network {
            return Err(invalid(invoice, "network mismatch"));
        }
        if recipient_id.is_empty() {
            return Err(invalid(invoice, "empty recipient"));
        }

        let mut expiration_timestamp = None;
        let mut transport_endpoints = Vec::new();
        for param in query.into_iter().flat_map(|q| q.split('&')) {
            match param.split_once('=') {
                Some(("expiry", raw)) => {
                    let secs = raw
                        .parse::<i64>()
                        .map_err(|_| invalid(invoice, "invalid expiry"))?;
                    expiration_timestamp = Some(
                        Utc.timestamp_opt(secs, 0)
                            .single()
                            .ok_or_else(|| invalid(invoice, "invalid expiry"))?,
                    );
                }
                Some(("endpoints", raw)) => {
                    transport_endpoints = raw
                        .split(',')
                        .filter(|e| !e.is_empty())
                        .map(ToString::to_string)
                        .collect();
                }
                // Unknown parameters belong to newer encodings.
                _ => {}
            }
        }

        Ok(InvoiceData {
            recipient_id: recipient_id.to_string(),
            asset_id,
            amount,
            expiration_timestamp,
            transport_endpoints,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> InvoiceData {
        InvoiceData {
            recipient_id: "utxob:2Fq7x".to_string(),
            asset_id: Some("rgb:d4Tz-Qe1".to_string()),
            amount: Some(100),
            expiration_timestamp: Utc.timestamp_opt(1_700_086_400, 0).single(),
            transport_endpoints: vec!["rpcs://proxy.iriswallet.com/0.2/json-rpc".to_string()],
        }
    }

    #[test]
    fn encodes_uri_shape() {
        let codec = RgbInvoiceCodec::new("bcrt");
        assert_eq!(
            codec.encode(&data()).unwrap(),
            "rgb:rgb:d4Tz-Qe1/100/bcrt:utxob:2Fq7x?expiry=1700086400&endpoints=rpcs://proxy.iriswallet.com/0.2/json-rpc"
        );
    }

    #[test]
    fn decode_reads_back_fields() {
        let codec = RgbInvoiceCodec::new("bcrt");
        let encoded = codec.encode(&data()).unwrap();
        assert_eq!(codec.decode(&encoded).unwrap(), data());
    }

    #[test]
    fn open_amount_and_asset() {
        let codec = RgbInvoiceCodec::default();
        let decoded = codec.decode("rgb:~/~/bc:wvout:abc").unwrap();
        assert_eq!(decoded.asset_id, None);
        assert_eq!(decoded.amount, None);
        assert_eq!(decoded.recipient_id, "wvout:abc");
        assert!(decoded.transport_endpoints.is_empty());
    }

    #[test]
    fn rejects_malformed_invoices() {
        let codec = RgbInvoiceCodec::default();
        for bad in [
            "lnbc1...",
            "rgb:asset/10",
            "rgb:asset/ten/bc:utxob:x",
            "rgb:asset/10/tb:utxob:x",
            "rgb:asset/10/bc:utxob:x?expiry=soon",
        ] {
            assert!(
                matches!(codec.decode(bad), Err(LedgerError::InvalidInvoice(_))),
                "{bad}"
            );
        }
    }
}

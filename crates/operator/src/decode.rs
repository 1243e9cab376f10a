//! Block decoders: opaque block bytes from the source ledger to transaction records.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use primitives::{ChainInfo, StructuredBlock, TxRecord};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing or mistyped field {0}")]
    Field(String),
    #[error("bad number in {field}: {value:?}")]
    Number { field: String, value: String },
    #[error("argument {index} of {tx_id}: {reason}")]
    Argument { tx_id: String, index: usize, reason: String },
}

pub trait BlockDecoder: Send + Sync {
    fn decode_block(&self, raw: &[u8]) -> Result<StructuredBlock, DecodeError>;
    fn decode_chain_info(&self, raw: &[u8]) -> Result<ChainInfo, DecodeError>;
}

/// Blocks and chain info already serialized as [`StructuredBlock`] / [`ChainInfo`] JSON.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonBlockDecoder;

impl BlockDecoder for JsonBlockDecoder {
    fn decode_block(&self, raw: &[u8]) -> Result<StructuredBlock, DecodeError> { Ok(serde_json::from_slice(raw)?) }

    fn decode_chain_info(&self, raw: &[u8]) -> Result<ChainInfo, DecodeError> { Ok(serde_json::from_slice(raw)?) }
}

/// The protobuf-as-JSON rendering of Fabric blocks (`configtxlator proto_decode`).
/// Numbers arrive as strings and chaincode arguments as base64.
#[derive(Clone, Copy, Debug, Default)]
pub struct FabricJsonDecoder;

const BLOCK_NUMBER: &str = "/header/number";
const TX_ID: &str = "/payload/header/channel_header/tx_id";
const ACTIONS: &str = "/payload/data/actions";
const ACTION_ARGS: &str = "/payload/chaincode_proposal_payload/input/chaincode_spec/input/args";

impl BlockDecoder for FabricJsonDecoder {
    fn decode_block(&self, raw: &[u8]) -> Result<StructuredBlock, DecodeError> {
        let block: Value = serde_json::from_slice(raw)?;
        let number = number_at(&block, BLOCK_NUMBER)?;
        let envelopes = block
            .pointer("/data/data")
            .and_then(Value::as_array)
            .ok_or_else(|| DecodeError::Field("/data/data".into()))?;

        let mut transactions = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            // Configuration envelopes carry no chaincode actions.
            let Some(actions) = envelope.pointer(ACTIONS).and_then(Value::as_array) else { continue };
            let tx_id = envelope
                .pointer(TX_ID)
                .and_then(Value::as_str)
                .ok_or_else(|| DecodeError::Field(TX_ID.into()))?
                .to_string();

            let mut args = Vec::new();
            for action in actions {
                let encoded = action
                    .pointer(ACTION_ARGS)
                    .and_then(Value::as_array)
                    .ok_or_else(|| DecodeError::Field(format!("{ACTIONS}[]{ACTION_ARGS}")))?;
                for arg in encoded {
                    args.push(decode_arg(&tx_id, args.len(), arg)?);
                }
            }
            transactions.push(TxRecord { tx_id, args });
        }
        Ok(StructuredBlock { number, transactions })
    }

    fn decode_chain_info(&self, raw: &[u8]) -> Result<ChainInfo, DecodeError> {
        let info: Value = serde_json::from_slice(raw)?;
        Ok(ChainInfo { height: number_at(&info, "/height")? })
    }
}

fn decode_arg(tx_id: &str, index: usize, arg: &Value) -> Result<String, DecodeError> {
    let fail = |reason: String| DecodeError::Argument { tx_id: tx_id.to_string(), index, reason };
    let text = arg.as_str().ok_or_else(|| fail("not a string".into()))?;
    let bytes = STANDARD.decode(text).map_err(|e| fail(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| fail(e.to_string()))
}

/// Unsigned integer rendered either as a JSON number or a decimal string.
fn number_at(value: &Value, pointer: &str) -> Result<u64, DecodeError> {
    match value.pointer(pointer) {
        Some(Value::String(s)) => {
            s.trim().parse().map_err(|_| DecodeError::Number { field: pointer.into(), value: s.clone() })
        }
        Some(Value::Number(n)) => {
            n.as_u64().ok_or_else(|| DecodeError::Number { field: pointer.into(), value: n.to_string() })
        }
        _ => Err(DecodeError::Field(pointer.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitives::ops;
    use serde_json::json;

    fn b64(s: &str) -> String { STANDARD.encode(s) }

    fn envelope(tx_id: &str, args: &[&str]) -> Value {
        json!({
            "payload": {
                "header": { "channel_header": { "tx_id": tx_id, "type": 3 } },
                "data": { "actions": [{
                    "payload": { "chaincode_proposal_payload": { "input": { "chaincode_spec": {
                        "input": { "args": args.iter().map(|a| b64(a)).collect::<Vec<_>>() }
                    }}}}
                }]}
            }
        })
    }

    #[test]
    fn fabric_block_yields_decoded_arguments() {
        let block = json!({
            "header": { "number": "7" },
            "data": { "data": [
                envelope("tx-a", &[ops::CREATE_PLAYER, "12"]),
                { "payload": { "header": { "channel_header": { "type": 1 } }, "data": { "config": {} } } },
                envelope("tx-b", &[ops::EXCHANGE, "12", "-500"]),
            ]}
        });
        let decoded = FabricJsonDecoder.decode_block(block.to_string().as_bytes()).unwrap();
        assert_eq!(decoded.number, 7);
        assert_eq!(decoded.transactions, vec![
            TxRecord::new("tx-a", &[ops::CREATE_PLAYER, "12"]),
            TxRecord::new("tx-b", &[ops::EXCHANGE, "12", "-500"]),
        ]);
    }

    #[test]
    fn fabric_block_rejects_bad_base64() {
        let mut env = envelope("tx-a", &[ops::CREATE_PLAYER]);
        env["payload"]["data"]["actions"][0]["payload"]["chaincode_proposal_payload"]["input"]["chaincode_spec"]
            ["input"]["args"] = json!(["%%%"]);
        let block = json!({ "header": { "number": "2" }, "data": { "data": [env] } });
        let err = FabricJsonDecoder.decode_block(block.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, DecodeError::Argument { index: 0, .. }));
    }

    #[test]
    fn fabric_chain_info_height_as_string_or_number() {
        assert_eq!(FabricJsonDecoder.decode_chain_info(br#"{"height":"12"}"#).unwrap().height, 12);
        assert_eq!(FabricJsonDecoder.decode_chain_info(br#"{"height":3}"#).unwrap().height, 3);
        assert!(matches!(FabricJsonDecoder.decode_chain_info(br#"{"height":"x"}"#), Err(DecodeError::Number { .. })));
        assert!(matches!(FabricJsonDecoder.decode_chain_info(b"{}"), Err(DecodeError::Field(_))));
    }

    #[test]
    fn json_decoder_reads_native_records() {
        let block = StructuredBlock { number: 4, transactions: vec![TxRecord::new("t", &[ops::RECORD_BANK_TX])] };
        let raw = serde_json::to_vec(&block).unwrap();
        assert_eq!(JsonBlockDecoder.decode_block(&raw).unwrap(), block);
        assert!(matches!(JsonBlockDecoder.decode_block(b"not json"), Err(DecodeError::Json(_))));
    }
}

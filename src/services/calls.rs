use crate::{
    domain::abi::is_read_only,
    error::{Result, ServerError},
    services::{chain::ChainProvider, chain::ContractHandle, decode::value_to_json},
};
use alloy::{
    dyn_abi::{DynSolType, DynSolValue, FunctionExt, JsonAbiExt, Specifier},
    json_abi::Function,
    primitives::Bytes,
};
use serde_json::Value;
use tracing::debug;

/// Standard ERC-20 getters queried for the contract data view.
pub const STANDARD_GETTERS: [&str; 4] = ["name", "symbol", "totalSupply", "decimals"];

/// Invokes a view/pure function with JSON arguments coerced by ABI type.
pub async fn call_read_only(
    provider: &dyn ChainProvider,
    handle: &ContractHandle,
    function_name: &str,
    args: &[Value],
) -> Result<Vec<Value>> {
    let function = select_overload(handle, function_name, args.len())?;
    let calldata = encode_call(function, args)?;

    debug!(
        "Calling {} on {} with {} args",
        function_name,
        handle.key_address(),
        args.len()
    );

    let output = provider.call(handle, calldata).await?;
    let values = function
        .abi_decode_output(&output, true)
        .map_err(|e| ServerError::Decode {
            event: function_name.to_string(),
            details: e.to_string(),
        })?;

    Ok(values.iter().map(value_to_json).collect())
}

fn select_overload<'a>(
    handle: &'a ContractHandle,
    function_name: &str,
    arg_count: usize,
) -> Result<&'a Function> {
    let overloads = handle.functions(function_name);
    if overloads.is_empty() {
        return Err(ServerError::FunctionNotFound(function_name.to_string()));
    }

    let function = overloads
        .iter()
        .find(|f| f.inputs.len() == arg_count)
        .ok_or_else(|| {
            ServerError::InvalidArguments(format!(
                "{} does not accept {} arguments",
                function_name, arg_count
            ))
        })?;

    if !is_read_only(function) {
        return Err(ServerError::FunctionNotReadOnly(function_name.to_string()));
    }

    Ok(function)
}

pub fn encode_call(function: &Function, args: &[Value]) -> Result<Bytes> {
    let values = function
        .inputs
        .iter()
        .zip(args)
        .map(|(param, arg)| {
            let ty: DynSolType = param.resolve().map_err(|e| {
                ServerError::InvalidAbi(format!("{}: {}", function.name, e))
            })?;
            coerce_arg(&ty, arg).map_err(|e| {
                ServerError::InvalidArguments(format!("{} ({}): {}", param.name, ty, e))
            })
        })
        .collect::<Result<Vec<DynSolValue>>>()?;

    let calldata = function
        .abi_encode_input(&values)
        .map_err(|e| ServerError::InvalidArguments(e.to_string()))?;

    Ok(Bytes::from(calldata))
}

fn coerce_arg(ty: &DynSolType, arg: &Value) -> std::result::Result<DynSolValue, String> {
    let text = match arg {
        Value::String(s) => s.clone(),
        Value::Null => return Err("null is not a valid argument".to_string()),
        other => other.to_string(),
    };
    ty.coerce_str(&text).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{abi::erc20_abi, AbiDescriptor};
    use crate::testing::MockChainProvider;
    use alloy::primitives::U256;
    use serde_json::json;

    const ADDR: &str = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48";

    fn handle() -> ContractHandle {
        let abi = AbiDescriptor::parse(&erc20_abi()).unwrap();
        ContractHandle::new(ADDR, &abi).unwrap()
    }

    #[test]
    fn test_encode_balance_of() {
        let handle = handle();
        let function = &handle.functions("balanceOf")[0];
        let calldata = encode_call(function, &[json!(ADDR)]).unwrap();

        assert_eq!(&calldata[..4], function.selector().as_slice());
        assert_eq!(calldata.len(), 4 + 32);
    }

    #[test]
    fn test_encode_rejects_bad_argument() {
        let handle = handle();
        let function = &handle.functions("balanceOf")[0];
        let err = encode_call(function, &[json!("not-an-address")]).unwrap_err();
        assert!(matches!(err, ServerError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_call_rejects_state_changing_function() {
        let provider = MockChainProvider::new();
        let err = call_read_only(&provider, &handle(), "transfer", &[json!(ADDR), json!("1")])
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::FunctionNotReadOnly(_)));

        let err = call_read_only(&provider, &handle(), "mint", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::FunctionNotFound(_)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_call_decodes_output() {
        let provider = MockChainProvider::new();
        let handle = handle();
        let balance = U256::from(10).pow(U256::from(30));
        provider.set_call_result(
            &handle.functions("balanceOf")[0],
            DynSolValue::Tuple(vec![DynSolValue::Uint(balance, 256)]),
        );

        let result = call_read_only(&provider, &handle, "balanceOf", &[json!(ADDR)])
            .await
            .unwrap();
        assert_eq!(result, vec![json!("1000000000000000000000000000000")]);
        assert_eq!(provider.call_count(), 1);
    }
}

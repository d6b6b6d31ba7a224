use usdt_link_core::{
    classify_transfer_error, validate_address, validate_amount, AmountError, NetworkId,
    PortError, TransferFailure, WalletError,
};

#[test]
fn amount_must_be_positive_and_within_balance() {
    assert_eq!(validate_amount("0", "10"), Err(AmountError::NonPositive));
    assert_eq!(validate_amount("0.000", "10"), Err(AmountError::NonPositive));
    assert_eq!(validate_amount("-1", "10"), Err(AmountError::NonPositive));
    assert_eq!(validate_amount("5", "10"), Ok(()));
    assert_eq!(validate_amount("10", "10.0"), Ok(()));
    assert_eq!(
        validate_amount("15", "10"),
        Err(AmountError::ExceedsBalance {
            balance: "10".to_owned()
        })
    );
    assert!(matches!(
        validate_amount("10.000001", "10"),
        Err(AmountError::ExceedsBalance { .. })
    ));
}

#[test]
fn malformed_amounts_are_rejected() {
    for raw in ["abc", "1.2.3", "", "1e6", "0x10"] {
        assert!(
            matches!(validate_amount(raw, "10"), Err(AmountError::Malformed(_))),
            "{raw:?}"
        );
    }
}

#[test]
fn address_format_and_checksum() {
    let token = "0xdAC17F958D2ee523a2206206994597C13D831ec7";
    assert_eq!(
        validate_address(token).expect("checksummed").to_string(),
        token
    );
    validate_address(&token.to_ascii_lowercase()).expect("lowercase");
    validate_address("0xDAC17F958D2EE523A2206206994597C13D831EC7").expect("uppercase");

    for bad in [
        "0xdac17F958D2ee523a2206206994597C13D831ec7",
        "dAC17F958D2ee523a2206206994597C13D831ec7",
        "0x1234",
        "0xgAC17F958D2ee523a2206206994597C13D831ec7",
        "",
    ] {
        assert!(
            matches!(validate_address(bad), Err(WalletError::InvalidAddress(_))),
            "{bad:?}"
        );
    }
}

#[test]
fn transfer_errors_classify_by_code_and_message() {
    let rejected = PortError::Rpc {
        code: 4001,
        message: "denied".to_owned(),
    };
    assert_eq!(classify_transfer_error(&rejected), TransferFailure::UserRejected);
    assert_eq!(
        classify_transfer_error(&PortError::Transport("ACTION_REJECTED".to_owned())),
        TransferFailure::UserRejected
    );
    assert_eq!(
        classify_transfer_error(&PortError::Transport(
            "execution reverted: insufficient allowance".to_owned()
        )),
        TransferFailure::InsufficientAllowance
    );
    assert!(matches!(
        classify_transfer_error(&PortError::Transport("nonce too low".to_owned())),
        TransferFailure::Unknown(m) if m.contains("nonce too low")
    ));
}

#[test]
fn user_messages_match_host_copy() {
    let err = WalletError::NetworkSwitchFailed {
        network: NetworkId::Polygon,
        message: "chain not added".to_owned(),
    };
    assert_eq!(
        err.user_message(),
        "Failed to switch to POL network. chain not added"
    );
    assert_eq!(
        WalletError::InvalidAmount(AmountError::NonPositive).user_message(),
        "Amount must be greater than 0"
    );
    assert_eq!(
        WalletError::TransferSubmissionFailed(TransferFailure::Unknown(String::new()))
            .user_message(),
        "Transaction failed. Please try again."
    );
    assert!(WalletError::ConnectionInProgress.is_silent());
    assert!(!WalletError::ConnectionRejected.is_silent());
}

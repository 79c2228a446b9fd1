use alloy::{
    primitives::{
        Address,
        B256,
    },
    providers::Provider,
    sol,
};

/// Referral code sent with purchases made without a referrer.
pub const NULL_REFERRAL_CODE: B256 = B256::ZERO;

pub mod lottery_types {
    use super::*;

    sol! {
        #[sol(rpc)]
        interface ILottery {
            event Ticket(
                uint256 indexed round,
                address indexed player,
                uint256 indexed id,
                uint8[] numbers
            );
            event Ticket6(
                uint256 indexed round,
                address indexed player,
                uint256 indexed id,
                uint8[6] numbers
            );
            event VRFRequest(uint256 indexed round, uint256 indexed subscriptionId, uint256 requestId);
            event Draw(uint256 indexed round, uint8[6] numbers);

            function owner() external view returns (address);
            function paused() external view returns (bool);
            function isOpen() external view returns (bool);
            function currencyToken() external view returns (address);
            function getJackpot() external view returns (uint256);
            function getBaseTicketPrice() external view returns (uint256);
            function getTicketPrice(uint8[] numbers) external view returns (uint256);
            function getCurrentRound() external view returns (uint256);
            function getNextDrawTime() external view returns (uint256);
            function getTicketIds(address account) external view returns (uint256[]);
            function getTicket(uint256 id) external view returns (
                address player,
                uint256 round,
                uint256 blockNumber,
                uint8[] numbers
            );
            function getTicketPrize(uint256 id) external view returns (
                uint256 prize,
                uint256 withdrawBlockNumber
            );
            function getRoundData(uint256 round) external view returns (
                uint256[5] prizes,
                uint256 stash,
                uint256 totalCombinations,
                uint256 drawBlockNumber,
                uint256 closureBlockNumber,
                uint8[6] numbers,
                uint256[5] winners
            );

            function createTicket6(bytes32 referralCode, uint8[6] numbers) external returns (uint256);
            function createTicket(bytes32 referralCode, uint8[] numbers) external returns (uint256);
            function createTicket6WithPermit(
                bytes32 referralCode,
                uint8[6] numbers,
                uint256 value,
                uint256 deadline,
                uint8 v,
                bytes32 r,
                bytes32 s
            ) external returns (uint256);
            function createTicketWithPermit(
                bytes32 referralCode,
                uint8[] numbers,
                uint256 value,
                uint256 deadline,
                uint8 v,
                bytes32 r,
                bytes32 s
            ) external returns (uint256);
            function createTicket6WithDaiPermit(
                bytes32 referralCode,
                uint8[6] numbers,
                uint256 nonce,
                uint256 expiry,
                uint8 v,
                bytes32 r,
                bytes32 s
            ) external returns (uint256);
            function createTicketWithDaiPermit(
                bytes32 referralCode,
                uint8[] numbers,
                uint256 nonce,
                uint256 expiry,
                uint8 v,
                bytes32 r,
                bytes32 s
            ) external returns (uint256);
            function withdrawPrize(uint256 ticketId) external;
        }
    }
}

pub mod controller_types {
    use super::*;

    sol! {
        #[sol(rpc)]
        interface IController {
            function token() external view returns (address);
            function canDraw() external view returns (bool);
            function waitingForClosure() external view returns (bool);
            function getUnclaimedRevenue(address account) external view returns (uint256);

            function draw(uint256 vrfSubscriptionId, bytes32 vrfKeyHash, bool nativePayment) external;
            function closeRound() external;
            function withdraw(address account) external;
        }
    }
}

pub mod token_types {
    use super::*;

    sol! {
        #[sol(rpc)]
        interface IERC20 {
            function name() external view returns (string);
            function balanceOf(address account) external view returns (uint256);
            function allowance(address owner, address spender) external view returns (uint256);
            function approve(address spender, uint256 value) external returns (bool);
        }

        #[sol(rpc)]
        interface IERC20Permit {
            function nonces(address owner) external view returns (uint256);
        }

        #[sol(rpc)]
        interface IDaiPermit {
            function getNonce(address holder) external view returns (uint256);
        }
    }
}

pub mod sale_types {
    use super::*;

    sol! {
        #[sol(rpc)]
        interface ITokenSale {
            function currencyToken() external view returns (address);
            function price() external view returns (uint256);
            function isOpen() external view returns (bool);
            function balanceOf(address account) external view returns (uint256);

            function purchaseWithDai(
                uint256 amount,
                uint256 nonce,
                uint256 expiry,
                uint8 v,
                bytes32 r,
                bytes32 s
            ) external;
            function withdrawAll() external;
        }
    }
}

/// EIP-712 messages signed off chain. Both are named `Permit` on chain,
/// hence one module each.
pub mod permit_types {
    pub mod eip2612 {
        alloy::sol! {
            #[derive(Debug, PartialEq, Eq)]
            struct Permit {
                address owner;
                address spender;
                uint256 value;
                uint256 nonce;
                uint256 deadline;
            }
        }
    }

    pub mod dai {
        alloy::sol! {
            #[derive(Debug, PartialEq, Eq)]
            struct Permit {
                address holder;
                address spender;
                uint256 nonce;
                uint256 expiry;
                bool allowed;
            }
        }
    }
}

pub fn lottery_instance<P: Provider>(
    address: Address,
    provider: P,
) -> lottery_types::ILottery::ILotteryInstance<P> {
    lottery_types::ILottery::new(address, provider)
}

pub fn controller_instance<P: Provider>(
    address: Address,
    provider: P,
) -> controller_types::IController::IControllerInstance<P> {
    controller_types::IController::new(address, provider)
}

pub fn token_instance<P: Provider>(
    address: Address,
    provider: P,
) -> token_types::IERC20::IERC20Instance<P> {
    token_types::IERC20::new(address, provider)
}

pub fn permit_token_instance<P: Provider>(
    address: Address,
    provider: P,
) -> token_types::IERC20Permit::IERC20PermitInstance<P> {
    token_types::IERC20Permit::new(address, provider)
}

pub fn dai_permit_instance<P: Provider>(
    address: Address,
    provider: P,
) -> token_types::IDaiPermit::IDaiPermitInstance<P> {
    token_types::IDaiPermit::new(address, provider)
}

pub fn sale_instance<P: Provider>(
    address: Address,
    provider: P,
) -> sale_types::ITokenSale::ITokenSaleInstance<P> {
    sale_types::ITokenSale::new(address, provider)
}

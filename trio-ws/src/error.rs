use thiserror::Error;

/// Errors surfaced to clients as EVENT_ERROR frames. Guard violations leave
/// broadcast state untouched; only the caller sees the message.
#[derive(Debug, Error, PartialEq)]
pub enum GameError {
    #[error("not joined in the current round")]
    NotInRound,
    #[error("operation expired, refresh and retry")]
    RoundStale,
    #[error("not your turn yet")]
    NotYourTurn,
    #[error("seat cannot act in its current state")]
    BadState,
    #[error("only the dealer can start the game")]
    NotDealer,
    #[error("not enough ready players to start")]
    NotEnoughPlayers,
    #[error("the hand has already started")]
    AlreadyPlaying,
    #[error("cannot join while a hand is in progress")]
    CannotJoinMidHand,
    #[error("compare target is not in the hand")]
    CompareInvalid,
    #[error("cannot compare against yourself")]
    CompareSelf,
    #[error("bet must be at least {floor}")]
    RaiseInsufficient { floor: i64 },
    #[error("insufficient balance")]
    UserInsufficientBalance,
    #[error("delayed message expired")]
    DelayExpired,
    #[error("seat has auto-bet enabled")]
    UserSetAutoBetting,
    #[error("the game is over")]
    GameOver,
    #[error("game does not exist")]
    GameNotExist,
    #[error("user does not exist")]
    UserNotExist,
    #[error("user not logged in")]
    NotAuthenticated,
    #[error("ante must be lower than the cap")]
    BadRoomConfig,
    #[error("internal cache error")]
    InternalCache,
    #[error("stored state could not be parsed")]
    StateParse,
}

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 扑克牌花色，黑桃4，红桃3，梅花2，方块1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Suit {
    Diamonds = 1, // 方块
    Clubs,        // 梅花
    Hearts,       // 红桃
    Spades,       // 黑桃
}

impl Suit {
    pub fn value(&self) -> u8 {
        *self as u8
    }

    pub fn from_value(value: u8) -> Result<Self, CardError> {
        match value {
            1 => Ok(Suit::Diamonds),
            2 => Ok(Suit::Clubs),
            3 => Ok(Suit::Hearts),
            4 => Ok(Suit::Spades),
            _ => Err(CardError::BadSuit(value)),
        }
    }
}

impl fmt::Display for Suit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Suit::Diamonds => write!(f, "♦"),
            Suit::Clubs => write!(f, "♣"),
            Suit::Hearts => write!(f, "♥"),
            Suit::Spades => write!(f, "♠"),
        }
    }
}

/// 扑克牌点数 2-14
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Rank {
    Two = 2,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Ten,
    Jack,  // J
    Queen, // Q
    King,  // K
    Ace,   // A
}

impl Rank {
    pub fn value(&self) -> u8 {
        *self as u8
    }

    pub fn from_value(value: u8) -> Result<Self, CardError> {
        match value {
            2 => Ok(Rank::Two),
            3 => Ok(Rank::Three),
            4 => Ok(Rank::Four),
            5 => Ok(Rank::Five),
            6 => Ok(Rank::Six),
            7 => Ok(Rank::Seven),
            8 => Ok(Rank::Eight),
            9 => Ok(Rank::Nine),
            10 => Ok(Rank::Ten),
            11 => Ok(Rank::Jack),
            12 => Ok(Rank::Queen),
            13 => Ok(Rank::King),
            14 => Ok(Rank::Ace),
            _ => Err(CardError::BadRank(value)),
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Rank::Two => write!(f, "2"),
            Rank::Three => write!(f, "3"),
            Rank::Four => write!(f, "4"),
            Rank::Five => write!(f, "5"),
            Rank::Six => write!(f, "6"),
            Rank::Seven => write!(f, "7"),
            Rank::Eight => write!(f, "8"),
            Rank::Nine => write!(f, "9"),
            Rank::Ten => write!(f, "10"),
            Rank::Jack => write!(f, "J"),
            Rank::Queen => write!(f, "Q"),
            Rank::King => write!(f, "K"),
            Rank::Ace => write!(f, "A"),
        }
    }
}

/// 单张扑克牌
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Card {
    pub rank: Rank,
    pub suit: Suit,
}

impl Card {
    pub fn new(rank: Rank, suit: Suit) -> Self {
        Card { rank, suit }
    }

    /// 牌面编码，规则：点数*10+花色
    pub fn code(&self) -> u8 {
        self.rank.value() * 10 + self.suit.value()
    }

    pub fn from_code(code: u8) -> Result<Self, CardError> {
        Ok(Card {
            rank: Rank::from_value(code / 10)?,
            suit: Suit::from_value(code % 10)?,
        })
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.rank, self.suit)
    }
}

/// 用户的三张底牌
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hand(pub [Card; 3]);

impl Hand {
    /// 转换成字符串逗号分割
    pub fn to_wire(&self) -> String {
        self.0
            .iter()
            .map(|card| card.code().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn from_wire(text: &str) -> Result<Self, CardError> {
        let mut cards = Vec::with_capacity(3);
        for part in text.split(',') {
            let code: u8 = part
                .trim()
                .parse()
                .map_err(|_| CardError::BadHand(text.to_string()))?;
            cards.push(Card::from_code(code)?);
        }

        cards
            .try_into()
            .map(Hand)
            .map_err(|_| CardError::BadHand(text.to_string()))
    }
}

impl fmt::Display for Hand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.0[0], self.0[1], self.0[2])
    }
}

/// 错误类型
#[derive(Error, Debug, PartialEq)]
pub enum CardError {
    #[error("Invalid rank value: {0}")]
    BadRank(u8),
    #[error("Invalid suit value: {0}")]
    BadSuit(u8),
    #[error("Invalid hand: {0}")]
    BadHand(String),
}

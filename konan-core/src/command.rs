//! REPLコマンド

use crate::parse::parse_location;
use crate::value::ValueLocation;

/// 例外ブレークポイントの対象
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchMode {
    Throw,
    Catch,
    Both,
    Off,
}

impl CatchMode {
    /// `(catch_enabled, throw_enabled)`
    pub fn flags(&self) -> (bool, bool) {
        match self {
            CatchMode::Throw => (false, true),
            CatchMode::Catch => (true, false),
            CatchMode::Both => (true, true),
            CatchMode::Off => (false, false),
        }
    }
}

/// REPLコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 値のサマリを表示
    Print {
        location: ValueLocation,
        type_name: String,
    },
    /// 値の子要素を表示
    Children {
        location: ValueLocation,
        type_name: String,
    },
    /// 値の動的型を表示
    Type {
        location: ValueLocation,
        type_name: String,
    },
    /// 例外ブレークポイントの設定
    Catch(CatchMode),
    /// 実行継続
    Continue,
    /// ロード済みイメージ一覧
    Images,
    /// シンボル検索
    Find(String),
    /// ヘルプ表示
    Help,
    /// 終了
    Quit,
}

impl Command {
    /// コマンド文字列をパースする
    pub fn parse(input: &str) -> Option<Self> {
        let parts: Vec<&str> = input.split_whitespace().collect();
        let (&name, args) = parts.split_first()?;

        match name {
            "print" | "p" => {
                let (location, type_name) = Self::value_args(args)?;
                Some(Command::Print {
                    location,
                    type_name,
                })
            }
            "children" | "ch" => {
                let (location, type_name) = Self::value_args(args)?;
                Some(Command::Children {
                    location,
                    type_name,
                })
            }
            "type" | "t" => {
                let (location, type_name) = Self::value_args(args)?;
                Some(Command::Type {
                    location,
                    type_name,
                })
            }
            "catch" => {
                let mode = match args.first().copied() {
                    None | Some("throw") => CatchMode::Throw,
                    Some("catch") => CatchMode::Catch,
                    Some("both") => CatchMode::Both,
                    Some("off") => CatchMode::Off,
                    Some(_) => return None,
                };
                Some(Command::Catch(mode))
            }
            "continue" | "c" => Some(Command::Continue),
            "images" => Some(Command::Images),
            "find" if !args.is_empty() => Some(Command::Find(args.join(" "))),
            "help" | "h" | "?" => Some(Command::Help),
            "quit" | "q" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }

    /// `<場所> <型名>` の引数（型名は空白を含みうる）
    fn value_args(args: &[&str]) -> Option<(ValueLocation, String)> {
        let (location, type_name) = args.split_first()?;
        if type_name.is_empty() {
            return None;
        }
        let location = parse_location(location).ok()?;
        Some((location, type_name.join(" ")))
    }
}

//! 连续重发策略
//!
//! 控制器固件在某些模式下把“停止收到命令”当作故障（看门狗超时），
//! 这些模式的命令必须每个周期重发一次。哪些模式需要重发由部署决定：
//! 速度环是确定需要的，位置类命令在不同固件版本上表现不一致，
//! 因此这里把分类做成显式的、可测试的策略对象。

use cubemars_protocol::CommandKind;

/// 需要在每个周期重发的命令类型集合
///
/// `Origin` 永远是单次命令，即使显式加入也会被忽略。
///
/// ```
/// use cubemars_driver::ContinuousPolicy;
/// use cubemars_protocol::CommandKind;
///
/// let policy = ContinuousPolicy::default();
/// assert!(policy.is_continuous(CommandKind::Rpm));
/// assert!(!policy.is_continuous(CommandKind::Position));
///
/// let policy = ContinuousPolicy::with_position();
/// assert!(policy.is_continuous(CommandKind::Position));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuousPolicy {
    /// 按命令标签索引的位图
    mask: u8,
}

impl ContinuousPolicy {
    /// 空策略：所有命令都只发送一次
    pub const fn none() -> Self {
        Self { mask: 0 }
    }

    /// 从任意命令类型集合构建
    pub fn from_kinds(kinds: impl IntoIterator<Item = CommandKind>) -> Self {
        kinds.into_iter().fold(Self::none(), Self::insert)
    }

    /// 默认集合加上 `Position` 和 `PositionSpeedAccel`
    pub fn with_position() -> Self {
        Self::default()
            .insert(CommandKind::Position)
            .insert(CommandKind::PositionSpeedAccel)
    }

    /// 加入一个命令类型
    pub fn insert(self, kind: CommandKind) -> Self {
        if kind == CommandKind::Origin {
            return self;
        }
        Self {
            mask: self.mask | (1 << kind.tag()),
        }
    }

    /// 移除一个命令类型
    pub fn remove(self, kind: CommandKind) -> Self {
        Self {
            mask: self.mask & !(1 << kind.tag()),
        }
    }

    /// 该类型的命令是否需要每个周期重发
    pub fn is_continuous(&self, kind: CommandKind) -> bool {
        self.mask & (1 << kind.tag()) != 0
    }

    /// 策略中包含的命令类型（按标签顺序）
    pub fn kinds(&self) -> impl Iterator<Item = CommandKind> + '_ {
        CommandKind::ALL
            .into_iter()
            .filter(move |kind| self.is_continuous(*kind))
    }
}

impl Default for ContinuousPolicy {
    /// `{Duty, Current, Brake, Rpm}`
    fn default() -> Self {
        Self::from_kinds([
            CommandKind::Duty,
            CommandKind::Current,
            CommandKind::Brake,
            CommandKind::Rpm,
        ])
    }
}

impl std::fmt::Display for ContinuousPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.kinds().map(CommandKind::name).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

//! s2irun core
//!
//! ビルド設定の読み込み・正規化・検証、ソースロケーターの解析、
//! イメージタグのテンプレート展開を提供します。

pub mod config;
pub mod error;
pub mod source;
pub mod tag;
pub mod validation;

pub use config::{
    AuthConfig, BuildConfig, CONFIG_ENV_VARIABLE, DockerConfig, EnvironmentSpec,
    KANIKO_ENV_VARIABLE, PullPolicy, VolumeSpec,
};
pub use error::{Result, S2iError, ValidationError, ValidationErrors};
pub use source::{LocatorKind, SourceDescriptor};
pub use tag::ImageReference;
pub use validation::normalize_and_validate;

// Copyright 2026 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Forwarding of repository traits through wrappers

/// Wraps a repository, passing every error it returns through `mapper`.
///
/// This is how backend-specific errors become a [`RepositoryError`] inside a
/// [`BoxRepository`].
///
/// [`RepositoryError`]: crate::RepositoryError
/// [`BoxRepository`]: crate::BoxRepository
pub struct MapErr<R, F> {
    pub(crate) inner: R,
    pub(crate) mapper: F,
}

impl<R, F> MapErr<R, F> {
    /// Wrap `inner`, converting its errors with `mapper`
    #[must_use]
    pub fn new(inner: R, mapper: F) -> Self {
        Self { inner, mapper }
    }
}

/// Implements a repository trait for [`Box<R>`] and [`MapErr<R, F>`], given
/// the list of its methods.
///
/// Every method must take `&mut self` and return `Result<_, Self::Error>`.
#[macro_export]
macro_rules! repository_impl {
    ($repo_trait:ident:
        $(
            async fn $method:ident (
                &mut self
                $(, $arg:ident: $arg_ty:ty )*
                $(,)?
            ) -> Result<$ret_ty:ty, Self::Error>;
        )*
    ) => {
        #[::async_trait::async_trait]
        impl<R: ?Sized> $repo_trait for ::std::boxed::Box<R>
        where
            R: $repo_trait,
        {
            type Error = <R as $repo_trait>::Error;

            $(
                async fn $method (&mut self $(, $arg: $arg_ty)*) -> Result<$ret_ty, Self::Error> {
                    (**self).$method ( $($arg),* ).await
                }
            )*
        }

        #[::async_trait::async_trait]
        impl<R, F, E> $repo_trait for $crate::MapErr<R, F>
        where
            R: $repo_trait,
            F: FnMut(<R as $repo_trait>::Error) -> E + ::std::marker::Send + ::std::marker::Sync,
        {
            type Error = E;

            $(
                async fn $method (&mut self $(, $arg: $arg_ty)*) -> Result<$ret_ty, Self::Error> {
                    self.inner.$method ( $($arg),* ).await.map_err(&mut self.mapper)
                }
            )*
        }
    };
}

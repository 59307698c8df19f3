/// Conversion of a borrowing PDU into its `'static` counterpart.
pub trait IntoOwned: Sized {
    type Owned: 'static;

    fn into_owned(self) -> Self::Owned;
}

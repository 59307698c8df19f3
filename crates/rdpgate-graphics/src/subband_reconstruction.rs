//! Differential reconstruction of the LL3 sub-band.
//!
//! The encoder stores the lowest sub-band as deltas; each coefficient is the
//! wrapping sum of itself and its predecessor.

pub fn decode(buffer: &mut [i16]) {
    for i in 1..buffer.len() {
        buffer[i] = buffer[i].overflowing_add(buffer[i - 1]).0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_does_not_panic_for_empty_buffer() {
        let mut buffer = [];
        decode(&mut buffer);
        assert!(buffer.is_empty());
    }

    #[test]
    fn decode_does_not_change_buffer_with_one_element() {
        let mut buffer = [1];
        decode(&mut buffer);
        assert_eq!([1], buffer);
    }

    #[test]
    fn decode_accumulates_running_sum() {
        let mut buffer = [1, 2, 3, 4, 5];
        let expected = [1, 3, 6, 10, 15];
        decode(&mut buffer);
        assert_eq!(expected, buffer);
    }

    #[test]
    fn decode_wraps_on_overflow() {
        let mut buffer = [32767, 32767, 32767, 32767, 32767];
        let expected = [32767, -2, 32765, -4, 32763];
        decode(&mut buffer);
        assert_eq!(expected, buffer);
    }

    #[test]
    fn decode_wraps_on_underflow() {
        let mut buffer = [-32768, -32768, -32768, -32768, -32768];
        let expected = [-32768, 0, -32768, 0, -32768];
        decode(&mut buffer);
        assert_eq!(expected, buffer);
    }

    #[test]
    fn decode_does_not_change_zeroed_buffer() {
        let mut buffer = [0, 0, 0, 0, 0];
        let expected = [0, 0, 0, 0, 0];
        decode(&mut buffer);
        assert_eq!(expected, buffer);
    }
}
